//! SQLite catalog store for imgsrv.
//!
//! This crate owns the durable side of the catalog: the [`Image`] record and
//! the [`CatalogDb`] pool wrapper with the query operations the scanner
//! pipeline and the HTTP layer consume.
//!
//! # Usage
//!
//! ```rust,ignore
//! use imgsrv_db::{CatalogDb, ImageFilter};
//!
//! let db = CatalogDb::open("/var/lib/imgsrv.db").await?;
//!
//! let imgs = db.find_many(&ImageFilter::default()).await?;
//! let one = db.find_one("qemu", "stable", "disk.img").await?;
//! ```

mod catalog;
mod error;
mod image;

pub use catalog::{delete_except, load_or_update, mod_times, ImageFilter};
pub use error::{DbError, Result};
pub use image::Image;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use tracing::info;

/// Cloneable handle to the catalog database.
///
/// All catalog access goes through this type; nothing else in the workspace
/// touches sqlx directly.
#[derive(Clone)]
pub struct CatalogDb {
    pool: SqlitePool,
}

impl CatalogDb {
    /// Open or create a file-backed catalog at the given path.
    ///
    /// Creates the schema if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        // WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "catalog opened");

        Ok(db)
    }

    /// Open an in-memory catalog.
    ///
    /// The pool is capped at one connection: every connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!("in-memory catalog opened");

        Ok(db)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS images (
                path       TEXT NOT NULL UNIQUE,
                driver     TEXT NOT NULL,
                category   TEXT NOT NULL,
                group_name TEXT NOT NULL,
                name       TEXT NOT NULL,
                link       TEXT NOT NULL,
                mod_time   INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_images_ident ON images(driver, category, name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Begin a transaction for a reconciliation batch.
    ///
    /// The batch either commits as a whole or is rolled back when the
    /// transaction is dropped on error.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// The underlying pool (escape hatch; prefer the typed methods).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the catalog.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
