//! Registry store trait and the SQLite implementation.

use crate::error::{RegistryError, RegistryResult};
use crate::repos::{SessionRepo, SiteRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined registry store trait.
#[async_trait]
pub trait RegistryStore: SiteRepo + SessionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> RegistryResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> RegistryResult<()>;
}

/// SQLite-based registry store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite registry. `":memory:"` opens a
    /// private in-memory database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> RegistryResult<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == ":memory:";

        let base = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        };
        let opts = base
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers; an in-memory database also lives
            // and dies with it, so it must never be reaped.
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: Duration::from_secs(query_timeout_secs.unwrap_or(30)),
        };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run a query future, warning when it exceeds the advisory timeout.
    /// SQLite cannot cancel statements, so slow queries are only reported.
    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> RegistryResult<T>
    where
        F: Future<Output = RegistryResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_secs = self.query_timeout.as_secs(),
                "Registry query exceeded advisory timeout"
            );
        }
        result
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn migrate(&self) -> RegistryResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{SiteRow, UploadSessionRow};
    use crate::repos::ChunkAck;
    use quay_core::upload::validate_chunk;
    use quay_core::{SiteId, SiteSummary, UploadSession};
    use sqlx::SqliteConnection;
    use time::OffsetDateTime;

    async fn load_session(
        conn: &mut SqliteConnection,
        site_id: &str,
    ) -> RegistryResult<Option<UploadSession>> {
        let row = sqlx::query_as::<_, UploadSessionRow>(
            "SELECT * FROM upload_sessions WHERE site_id = ?",
        )
        .bind(site_id)
        .fetch_optional(&mut *conn)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let chunks: Vec<i64> = sqlx::query_scalar(
            "SELECT chunk_number FROM upload_session_chunks WHERE site_id = ? ORDER BY chunk_number",
        )
        .bind(site_id)
        .fetch_all(&mut *conn)
        .await?;
        row.into_session(chunks).map(Some)
    }

    #[async_trait]
    impl SiteRepo for SqliteStore {
        async fn upsert_site(&self, site: &SiteSummary) -> RegistryResult<SiteSummary> {
            let row = SiteRow::from_summary(site);
            self.timed("upsert_site", async {
                sqlx::query(
                    r#"
                    INSERT INTO sites
                        (site_id, name, status, owner_id, entry_url, storage_url, file_count, upload_complete, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(site_id) DO UPDATE SET
                        name = excluded.name,
                        status = excluded.status,
                        owner_id = COALESCE(excluded.owner_id, sites.owner_id),
                        entry_url = excluded.entry_url,
                        storage_url = excluded.storage_url,
                        file_count = excluded.file_count,
                        upload_complete = excluded.upload_complete,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&row.site_id)
                .bind(&row.name)
                .bind(&row.status)
                .bind(&row.owner_id)
                .bind(&row.entry_url)
                .bind(&row.storage_url)
                .bind(row.file_count)
                .bind(row.upload_complete)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&self.pool)
                .await?;
                Ok::<_, RegistryError>(())
            })
            .await?;

            self.get_site(&site.id).await?.ok_or_else(|| {
                RegistryError::Internal(format!("site {} missing after upsert", site.id))
            })
        }

        async fn get_site(&self, site_id: &SiteId) -> RegistryResult<Option<SiteSummary>> {
            let row = self
                .timed("get_site", async {
                    Ok::<_, RegistryError>(
                        sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE site_id = ?")
                            .bind(site_id.as_str())
                            .fetch_optional(&self.pool)
                            .await?,
                    )
                })
                .await?;
            row.map(SiteRow::into_summary).transpose()
        }

        async fn list_sites(&self, owner_id: Option<&str>) -> RegistryResult<Vec<SiteSummary>> {
            let rows = self
                .timed("list_sites", async {
                    let rows = match owner_id {
                        Some(owner) => {
                            sqlx::query_as::<_, SiteRow>(
                                "SELECT * FROM sites WHERE owner_id = ? ORDER BY created_at DESC, site_id",
                            )
                            .bind(owner)
                            .fetch_all(&self.pool)
                            .await?
                        }
                        None => {
                            sqlx::query_as::<_, SiteRow>(
                                "SELECT * FROM sites ORDER BY created_at DESC, site_id",
                            )
                            .fetch_all(&self.pool)
                            .await?
                        }
                    };
                    Ok::<_, RegistryError>(rows)
                })
                .await?;
            rows.into_iter().map(SiteRow::into_summary).collect()
        }

        async fn delete_site(&self, site_id: &SiteId) -> RegistryResult<bool> {
            let result = sqlx::query("DELETE FROM sites WHERE site_id = ?")
                .bind(site_id.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn get_session(&self, site_id: &SiteId) -> RegistryResult<Option<UploadSession>> {
            let mut conn = self.pool.acquire().await?;
            load_session(&mut conn, site_id.as_str()).await
        }

        async fn put_session(&self, session: &UploadSession) -> RegistryResult<()> {
            let mut tx = self.pool.begin().await?;
            let site_id = session.site_id.as_str();

            sqlx::query(
                r#"
                INSERT INTO upload_sessions (site_id, total_chunks, files_written, owner_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(site_id) DO UPDATE SET
                    total_chunks = excluded.total_chunks,
                    files_written = excluded.files_written,
                    owner_id = excluded.owner_id,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(site_id)
            .bind(i64::from(session.total_chunks))
            .bind(i64::try_from(session.files_written).unwrap_or(i64::MAX))
            .bind(&session.owner_id)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM upload_session_chunks WHERE site_id = ?")
                .bind(site_id)
                .execute(&mut *tx)
                .await?;
            for chunk in &session.received_chunks {
                sqlx::query(
                    "INSERT INTO upload_session_chunks (site_id, chunk_number, received_at) VALUES (?, ?, ?)",
                )
                .bind(site_id)
                .bind(i64::from(*chunk))
                .bind(session.updated_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn delete_session(&self, site_id: &SiteId) -> RegistryResult<Option<UploadSession>> {
            let mut tx = self.pool.begin().await?;
            let session = load_session(&mut tx, site_id.as_str()).await?;
            if session.is_some() {
                // Chunks cascade
                sqlx::query("DELETE FROM upload_sessions WHERE site_id = ?")
                    .bind(site_id.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(session)
        }

        async fn record_chunk(
            &self,
            site_id: &SiteId,
            chunk_number: u32,
            total_chunks: u32,
            files: u64,
            owner_id: Option<&str>,
        ) -> RegistryResult<ChunkAck> {
            validate_chunk(chunk_number, total_chunks)?;
            let now = OffsetDateTime::now_utc();

            self.timed("record_chunk", async {
                // The write lock taken by the first statement serializes concurrent chunks.
                let mut tx = self.pool.begin().await?;

                sqlx::query(
                    r#"
                    INSERT INTO upload_sessions (site_id, total_chunks, files_written, owner_id, created_at, updated_at)
                    VALUES (?, ?, 0, ?, ?, ?)
                    ON CONFLICT(site_id) DO UPDATE SET
                        total_chunks = MAX(upload_sessions.total_chunks, excluded.total_chunks),
                        owner_id = COALESCE(upload_sessions.owner_id, excluded.owner_id),
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(site_id.as_str())
                .bind(i64::from(total_chunks))
                .bind(owner_id)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                let inserted = sqlx::query(
                    "INSERT OR IGNORE INTO upload_session_chunks (site_id, chunk_number, received_at) VALUES (?, ?, ?)",
                )
                .bind(site_id.as_str())
                .bind(i64::from(chunk_number))
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                    > 0;

                if inserted {
                    sqlx::query(
                        "UPDATE upload_sessions SET files_written = files_written + ? WHERE site_id = ?",
                    )
                    .bind(i64::try_from(files).unwrap_or(i64::MAX))
                    .bind(site_id.as_str())
                    .execute(&mut *tx)
                    .await?;
                }

                let session = load_session(&mut tx, site_id.as_str())
                    .await?
                    .ok_or_else(|| {
                        RegistryError::Internal(format!("session {site_id} missing after insert"))
                    })?;
                tx.commit().await?;

                Ok::<_, RegistryError>(ChunkAck {
                    session,
                    newly_received: inserted,
                })
            })
            .await
        }

        async fn delete_idle_sessions(
            &self,
            cutoff: OffsetDateTime,
        ) -> RegistryResult<Vec<SiteId>> {
            let ids: Vec<String> = sqlx::query_scalar(
                "DELETE FROM upload_sessions WHERE updated_at < ? RETURNING site_id",
            )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            ids.iter()
                .map(|id| SiteId::parse(id).map_err(RegistryError::from))
                .collect()
        }

        async fn count_sessions(&self) -> RegistryResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions")
                .fetch_one(&self.pool)
                .await?;
            Ok(u64::try_from(count).unwrap_or(0))
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Sites
CREATE TABLE IF NOT EXISTS sites (
    site_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('draft', 'active', 'failed')),
    owner_id TEXT,
    entry_url TEXT NOT NULL,
    storage_url TEXT,
    file_count INTEGER NOT NULL DEFAULT 0,
    upload_complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sites_owner ON sites(owner_id);

-- Upload sessions
CREATE TABLE IF NOT EXISTS upload_sessions (
    site_id TEXT PRIMARY KEY,
    total_chunks INTEGER NOT NULL,
    files_written INTEGER NOT NULL DEFAULT 0,
    owner_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_updated ON upload_sessions(updated_at);

-- Received chunks; the composite key keeps acknowledgements disjoint
CREATE TABLE IF NOT EXISTS upload_session_chunks (
    site_id TEXT NOT NULL REFERENCES upload_sessions(site_id) ON DELETE CASCADE,
    chunk_number INTEGER NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (site_id, chunk_number)
);
"#;
