use crate::config::DatabaseConfig;
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::Connection;

/// Per-connection defaults for this workload. Listings and statistics read
/// whole tables (the filters run in the router, not in SQL), while writes
/// are single rows — WAL lets those scans proceed under concurrent inserts.
/// `foreign_keys` backs the installation→incident→photo references, and the
/// busy timeout covers pool connections contending for the write lock.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

/// Open the database for the service: build the pool, lock down the file,
/// apply the connection defaults and bring the schema up to date.
pub async fn open_pool(
    config: &DatabaseConfig,
) -> Result<Pool, Box<dyn std::error::Error + Send + Sync>> {
    let db_path = config.path.clone();

    // The file stores credential hashes; keep it owner-only (Unix).
    #[cfg(unix)]
    if db_path.exists() {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&db_path, std::fs::Permissions::from_mode(0o600))
        {
            tracing::warn!(error = %e, "could not restrict database file permissions");
        }
    }

    let pool = Config::new(db_path).create_pool(Runtime::Tokio1)?;

    let conn = pool.get().await?;
    conn.interact(|conn| {
        configure_connection(conn)?;
        crate::storage::migrations::run_migrations(conn)
    })
    .await
    .map_err(|e| e.to_string())??;

    Ok(pool)
}
