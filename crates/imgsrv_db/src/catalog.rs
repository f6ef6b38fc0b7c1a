//! Catalog query operations.
//!
//! Point and filtered lookups hang off [`CatalogDb`] and run on the pool.
//! The bulk operations the synchronizer composes ([`delete_except`],
//! [`mod_times`], [`load_or_update`]) take a `&mut SqliteConnection` so they
//! can share one transaction per reconciliation batch.

use crate::error::Result;
use crate::{CatalogDb, Image};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;

const IMAGE_COLUMNS: &str = "path, driver, category, group_name, name, link, mod_time";

/// Equality filters for [`CatalogDb::find_many`]. `None` means no filter.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub driver: Option<String>,
    pub category: Option<String>,
    pub group: Option<String>,
}

impl ImageFilter {
    /// Build a filter from request path/query values, where the empty string
    /// means "not constrained".
    pub fn from_request(driver: &str, category: &str, group: &str) -> Self {
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };

        Self {
            driver: opt(driver),
            category: opt(category),
            group: opt(group),
        }
    }
}

impl CatalogDb {
    /// Point lookup by the natural key (driver, category, name).
    pub async fn find_one(
        &self,
        driver: &str,
        category: &str,
        name: &str,
    ) -> Result<Option<Image>> {
        let row = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE driver = ? AND category = ? AND name = ?"
        ))
        .bind(driver)
        .bind(category)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| row_to_image(&row)))
    }

    /// Filtered, ordered listing.
    ///
    /// Ordering is fixed: driver, category, group, path ascending — the order
    /// the tree indexer expects.
    pub async fn find_many(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {IMAGE_COLUMNS} FROM images WHERE 1=1"));

        if let Some(ref driver) = filter.driver {
            qb.push(" AND driver = ").push_bind(driver);
        }
        if let Some(ref category) = filter.category {
            qb.push(" AND category = ").push_bind(category);
        }
        if let Some(ref group) = filter.group {
            qb.push(" AND group_name = ").push_bind(group);
        }

        qb.push(" ORDER BY driver, category, group_name, path");

        let rows = qb.build().fetch_all(self.pool()).await?;

        Ok(rows.iter().map(row_to_image).collect())
    }
}

/// Delete every stored record whose path is not in `paths`.
///
/// One statement regardless of catalog size; an empty snapshot clears the
/// catalog entirely.
pub async fn delete_except(conn: &mut SqliteConnection, paths: &[&str]) -> Result<u64> {
    if paths.is_empty() {
        let res = sqlx::query("DELETE FROM images").execute(conn).await?;
        return Ok(res.rows_affected());
    }

    let mut qb: QueryBuilder<sqlx::Sqlite> =
        QueryBuilder::new("DELETE FROM images WHERE path NOT IN (");
    let mut sep = qb.separated(", ");
    for path in paths {
        sep.push_bind(*path);
    }
    qb.push(")");

    let res = qb.build().execute(conn).await?;
    Ok(res.rows_affected())
}

/// Current (path → mod_time seconds) for the whole catalog, for diffing.
pub async fn mod_times(conn: &mut SqliteConnection) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT path, mod_time FROM images")
        .fetch_all(conn)
        .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("path"), row.get::<i64, _>("mod_time")))
        .collect())
}

/// Idempotent bulk upsert keyed on `path`.
///
/// A uniqueness conflict on `path` means the record is already cataloged:
/// only `mod_time` is refreshed, all other fields keep their first stored
/// values.
pub async fn load_or_update(conn: &mut SqliteConnection, images: &[&Image]) -> Result<()> {
    for img in images {
        sqlx::query(
            r#"
            INSERT INTO images (path, driver, category, group_name, name, link, mod_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET mod_time = excluded.mod_time
            "#,
        )
        .bind(&img.path)
        .bind(&img.driver)
        .bind(&img.category)
        .bind(&img.group)
        .bind(&img.name)
        .bind(&img.link)
        .bind(img.mod_time.timestamp())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn row_to_image(row: &SqliteRow) -> Image {
    let secs: i64 = row.get("mod_time");

    Image {
        path: row.get("path"),
        driver: row.get("driver"),
        category: row.get("category"),
        group: row.get("group_name"),
        name: row.get("name"),
        link: row.get("link"),
        mod_time: DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(path: &str, driver: &str, category: &str, group: &str, name: &str, secs: i64) -> Image {
        Image {
            path: path.to_string(),
            driver: driver.to_string(),
            category: category.to_string(),
            group: group.to_string(),
            name: name.to_string(),
            link: String::new(),
            mod_time: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    async fn load(db: &CatalogDb, imgs: &[Image]) {
        let mut tx = db.begin().await.unwrap();
        let refs: Vec<&Image> = imgs.iter().collect();
        load_or_update(&mut *tx, &refs).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn conflict_updates_only_mod_time() {
        let db = CatalogDb::open_memory().await.unwrap();

        load(
            &db,
            &[image("/s/qemu/a.img", "qemu", "", "first", "a.img", 100)],
        )
        .await;
        // Same path, different classification and newer mod_time.
        load(
            &db,
            &[image("/s/qemu/a.img", "qemu", "stable", "second", "b.img", 200)],
        )
        .await;

        let imgs = db.find_many(&ImageFilter::default()).await.unwrap();
        assert_eq!(imgs.len(), 1);
        assert_eq!(imgs[0].group, "first");
        assert_eq!(imgs[0].name, "a.img");
        assert_eq!(imgs[0].mod_time.timestamp(), 200);
    }

    #[tokio::test]
    async fn delete_except_evicts_missing_paths() {
        let db = CatalogDb::open_memory().await.unwrap();

        load(
            &db,
            &[
                image("/s/qemu/a.img", "qemu", "", "", "a.img", 1),
                image("/s/qemu/b.img", "qemu", "", "", "b.img", 1),
            ],
        )
        .await;

        let mut tx = db.begin().await.unwrap();
        let deleted = delete_except(&mut *tx, &["/s/qemu/b.img"]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(deleted, 1);

        let imgs = db.find_many(&ImageFilter::default()).await.unwrap();
        assert_eq!(imgs.len(), 1);
        assert_eq!(imgs[0].path, "/s/qemu/b.img");
    }

    #[tokio::test]
    async fn delete_except_with_empty_snapshot_clears_catalog() {
        let db = CatalogDb::open_memory().await.unwrap();
        load(&db, &[image("/s/qemu/a.img", "qemu", "", "", "a.img", 1)]).await;

        let mut tx = db.begin().await.unwrap();
        delete_except(&mut *tx, &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert!(db
            .find_many(&ImageFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn find_many_filters_and_orders() {
        let db = CatalogDb::open_memory().await.unwrap();

        load(
            &db,
            &[
                image("/s/vbox/z.img", "vbox", "", "", "z.img", 1),
                image("/s/qemu/stable/b.img", "qemu", "stable", "beta", "b.img", 1),
                image("/s/qemu/a.img", "qemu", "", "", "a.img", 1),
            ],
        )
        .await;

        let all = db.find_many(&ImageFilter::default()).await.unwrap();
        let paths: Vec<&str> = all.iter().map(|i| i.path.as_str()).collect();
        // driver asc, then category asc within driver.
        assert_eq!(
            paths,
            ["/s/qemu/a.img", "/s/qemu/stable/b.img", "/s/vbox/z.img"]
        );

        let qemu = db
            .find_many(&ImageFilter::from_request("qemu", "", ""))
            .await
            .unwrap();
        assert_eq!(qemu.len(), 2);

        let beta = db
            .find_many(&ImageFilter::from_request("qemu", "stable", "beta"))
            .await
            .unwrap();
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].name, "b.img");
    }

    #[tokio::test]
    async fn find_one_by_natural_key() {
        let db = CatalogDb::open_memory().await.unwrap();
        load(
            &db,
            &[image("/s/qemu/stable/a.img", "qemu", "stable", "", "a.img", 5)],
        )
        .await;

        let found = db.find_one("qemu", "stable", "a.img").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().path, "/s/qemu/stable/a.img");

        let missing = db.find_one("qemu", "", "a.img").await.unwrap();
        assert!(missing.is_none());
    }
}
