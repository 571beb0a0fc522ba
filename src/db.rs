use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DbConfig;
use crate::error::{RagError, Result};

/// Opens a connection pool for `dsn`, which may be a bare file path or a
/// `sqlite:` URL. Foreign keys are enforced so document deletes cascade.
pub async fn connect(dsn: &str, config: &DbConfig) -> Result<SqlitePool> {
    let url = if dsn.starts_with("sqlite:") {
        dsn.to_string()
    } else {
        let path = std::path::Path::new(dsn);
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::storage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        format!("sqlite:{}", path.display())
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}
