//! Durable job store for hookrun.
//!
//! Provides the job repository trait and its SQLite implementation. SQLite is
//! the single source of truth for job state; every state transition is one
//! conditional `UPDATE`, so the database serializes concurrent writers.

pub mod error;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create a new database connection pool, creating the database file if needed.
///
/// In-memory URLs get a single connection that is never recycled, since each
/// SQLite in-memory connection is its own database.
pub async fn create_pool(database_url: &str) -> DbResult<SqlitePool> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        if let Some(parent) = database_file(database_url).and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
            }
        }
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn database_file(database_url: &str) -> Option<&std::path::Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    Some(std::path::Path::new(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_file_from_url() {
        assert_eq!(
            database_file("sqlite://data/hookrun.db"),
            Some(std::path::Path::new("data/hookrun.db"))
        );
        assert_eq!(
            database_file("sqlite:/tmp/x.db?mode=rwc"),
            Some(std::path::Path::new("/tmp/x.db"))
        );
        assert_eq!(database_file("postgres://nope"), None);
    }

    #[tokio::test]
    async fn test_create_pool_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        let url = format!("sqlite://{}", path.display());

        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        // Running twice is a no-op.
        run_migrations(&pool).await.unwrap();

        assert!(path.exists());
    }
}
