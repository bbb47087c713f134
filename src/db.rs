use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::Result;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps every
    /// query on the same memory instance.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                blob_handle TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'raw',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Bucket backend: object descriptors plus fixed-size chunks
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blob_objects (
                handle TEXT PRIMARY KEY,
                length INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                chunk_size INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blob_chunks (
                handle TEXT NOT NULL,
                n INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (handle, n)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_owner_id ON files(owner_id)")
            .execute(&self.pool)
            .await?;

        // Chunks outlive their descriptor while being read; nothing reads
        // before startup, so any left over now are garbage
        let swept = sqlx::query(
            "DELETE FROM blob_chunks WHERE handle NOT IN (SELECT handle FROM blob_objects)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if swept > 0 {
            tracing::info!("Swept {} orphaned blob chunks", swept);
        }

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_sweep_orphaned_chunks() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("INSERT INTO blob_objects (handle, length, sha256, chunk_size) VALUES ('kept', 1, 'x', 1)")
            .execute(db.pool())
            .await
            .unwrap();
        for handle in ["kept", "orphan"] {
            sqlx::query("INSERT INTO blob_chunks (handle, n, data) VALUES (?, 0, x'00')")
                .bind(handle)
                .execute(db.pool())
                .await
                .unwrap();
        }

        db.run_migrations().await.unwrap();

        let left: Vec<String> = sqlx::query_scalar("SELECT handle FROM blob_chunks")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(left, vec!["kept".to_string()]);
    }
}
