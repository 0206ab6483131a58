//! Repository traits for registry operations.

pub mod sessions;
pub mod sites;

pub use sessions::{ChunkAck, SessionRepo};
pub use sites::SiteRepo;
