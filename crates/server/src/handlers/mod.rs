//! HTTP request handlers.

pub mod health;
pub mod proxy;
pub mod sites;
pub mod uploads;

pub use health::*;
pub use proxy::*;
pub use sites::*;
pub use uploads::*;
