//! Catalog reconciliation.
//!
//! Takes a scanner snapshot and makes the catalog match it inside a single
//! transaction: rows whose files disappeared are evicted, files whose mtime
//! moved (or which are new) are written back. Readers never observe a
//! half-applied batch.

use imgsrv_db::{delete_except, load_or_update, mod_times, CatalogDb, Image};
use tracing::debug;

#[derive(Clone)]
pub struct Synchronizer {
    db: CatalogDb,
}

impl Synchronizer {
    pub fn new(db: CatalogDb) -> Self {
        Self { db }
    }

    /// Reconcile the catalog with a snapshot. Returns how many rows were
    /// inserted or refreshed.
    pub async fn sync(&self, snapshot: &[Image]) -> imgsrv_db::Result<usize> {
        let mut tx = self.db.begin().await?;

        let paths: Vec<&str> = snapshot.iter().map(|img| img.path.as_str()).collect();
        let evicted = delete_except(&mut *tx, &paths).await?;

        // Only files whose mtime differs from the stored row go back in.
        let stored = mod_times(&mut *tx).await?;
        let changed: Vec<&Image> = snapshot
            .iter()
            .filter(|img| {
                stored
                    .get(&img.path)
                    .map_or(true, |&secs| secs != img.mod_time.timestamp())
            })
            .collect();

        load_or_update(&mut *tx, &changed).await?;
        tx.commit().await?;

        if evicted > 0 || !changed.is_empty() {
            debug!(evicted, changed = changed.len(), "catalog reconciled");
        }
        Ok(changed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use imgsrv_db::ImageFilter;

    fn img(path: &str, name: &str, secs_ago: i64) -> Image {
        Image {
            path: path.to_string(),
            driver: "qemu".to_string(),
            category: String::new(),
            group: String::new(),
            name: name.to_string(),
            link: String::new(),
            mod_time: Utc::now() - Duration::seconds(secs_ago),
        }
    }

    #[tokio::test]
    async fn snapshot_replaces_catalog_contents() {
        let db = CatalogDb::open_memory().await.unwrap();
        let sync = Synchronizer::new(db.clone());

        let s1 = vec![img("/s/qemu/a", "a", 100), img("/s/qemu/b", "b", 100)];
        assert_eq!(sync.sync(&s1).await.unwrap(), 2);

        // b disappears, c appears, a is unchanged.
        let s2 = vec![img("/s/qemu/a", "a", 100), img("/s/qemu/c", "c", 50)];
        assert_eq!(sync.sync(&s2).await.unwrap(), 1);

        let all = db.find_many(&ImageFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn unchanged_snapshot_writes_nothing() {
        let db = CatalogDb::open_memory().await.unwrap();
        let sync = Synchronizer::new(db);

        let snapshot = vec![img("/s/qemu/a", "a", 100)];
        assert_eq!(sync.sync(&snapshot).await.unwrap(), 1);
        assert_eq!(sync.sync(&snapshot).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn touched_file_is_refreshed() {
        let db = CatalogDb::open_memory().await.unwrap();
        let sync = Synchronizer::new(db.clone());

        sync.sync(&[img("/s/qemu/a", "a", 100)]).await.unwrap();
        assert_eq!(sync.sync(&[img("/s/qemu/a", "a", 10)]).await.unwrap(), 1);

        let row = db.find_one("qemu", "", "a").await.unwrap().unwrap();
        assert_eq!(
            row.mod_time.timestamp(),
            img("/s/qemu/a", "a", 10).mod_time.timestamp()
        );
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_wholesale() {
        let db = CatalogDb::open_memory().await.unwrap();
        let sync = Synchronizer::new(db.clone());

        sync.sync(&[img("/s/qemu/a", "a", 100)]).await.unwrap();

        // Reject one specific row mid-batch.
        sqlx::query(
            "CREATE TRIGGER reject_b BEFORE INSERT ON images \
             WHEN NEW.path = '/s/qemu/b' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        // a is evicted and c inserted before the failing row; the whole
        // transaction must roll back, not just the rejected insert.
        let batch = vec![img("/s/qemu/c", "c", 100), img("/s/qemu/b", "b", 100)];
        assert!(sync.sync(&batch).await.is_err());

        let all = db.find_many(&ImageFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);

        // Next cycle reconciles cleanly once the store recovers.
        sqlx::query("DROP TRIGGER reject_b")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(sync.sync(&batch).await.unwrap(), 2);

        let all = db.find_many(&ImageFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn empty_snapshot_clears_catalog() {
        let db = CatalogDb::open_memory().await.unwrap();
        let sync = Synchronizer::new(db.clone());

        sync.sync(&[img("/s/qemu/a", "a", 100)]).await.unwrap();
        sync.sync(&[]).await.unwrap();

        assert!(db.find_many(&ImageFilter::default()).await.unwrap().is_empty());
    }
}
