//! SQLite-backed persistence for torrent resume records.
//!
//! The store holds one row per torrent known to the daemon: enough to
//! reconstruct an `add_torrent` call against the engine after a restart,
//! without needing the engine itself to have been running in the meantime.

#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(
    clippy::module_name_repetitions,
    unexpected_cfgs,
    clippy::multiple_crate_versions
)]

pub mod error;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Connection, Row, SqliteConnection};

pub use error::{Result, StoreError};
use torrentd_engine::{InfoHash, TorrentClientData};

/// A torrent's durable record: everything needed to re-add it to the engine
/// after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentRecord {
    /// Identity of the torrent.
    pub info_hash: InfoHash,
    /// Display name, if known before metadata is fetched.
    pub name: Option<String>,
    /// Destination directory on disk.
    pub save_path: String,
    /// Position in the session's download queue.
    pub queue_position: i64,
    /// Opaque `save_resume_data` payload from the engine, if any.
    pub resume_blob: Option<Vec<u8>>,
    /// Daemon-owned metadata attached to the torrent.
    pub client_data: TorrentClientData,
}

impl TorrentRecord {
    fn key(&self) -> String {
        self.info_hash.to_string()
    }
}

type MigrationFuture<'a> = Pin<Box<dyn Future<Output = std::result::Result<(), sqlx::Error>> + Send + 'a>>;
type MigrationFn = for<'c> fn(&'c mut SqliteConnection) -> MigrationFuture<'c>;

fn migration_0001_create_torrents(conn: &mut SqliteConnection) -> MigrationFuture<'_> {
    Box::pin(async move {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS torrents (
                info_hash_key TEXT PRIMARY KEY,
                info_hash_v1 TEXT,
                info_hash_v2 TEXT,
                name TEXT,
                save_path TEXT NOT NULL,
                queue_position INTEGER NOT NULL,
                resume_blob BLOB,
                client_data_blob BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    })
}

/// Migrations in application order. `PRAGMA user_version` advances by one
/// per successful migration, so a crash mid-run leaves the schema at a
/// version that matches exactly what was committed.
const MIGRATIONS: &[MigrationFn] = &[migration_0001_create_torrents];

/// Handle to the persisted torrent table.
#[derive(Debug, Clone)]
pub struct TorrentStore {
    pool: SqlitePool,
}

impl TorrentStore {
    /// Opens (creating if necessary) the SQLite database at `database_path`
    /// and brings its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connect`] if the database cannot be opened, or
    /// [`StoreError::MigrationFailed`] if a migration fails to apply.
    pub async fn open(database_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Connect { source })?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Opens an in-memory database. Intended for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connect`] or [`StoreError::MigrationFailed`]
    /// under the same conditions as [`Self::open`].
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Connect { source })?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let mut conn = pool.acquire().await.map_err(|source| StoreError::Connect { source })?;
        let current: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|source| StoreError::Connect { source })?;
        #[allow(clippy::cast_sign_loss)]
        let current = current.max(0) as usize;

        for (index, migration) in MIGRATIONS.iter().enumerate().skip(current) {
            let mut tx = conn
                .begin()
                .await
                .map_err(|source| StoreError::MigrationFailed { index, source })?;
            migration(&mut tx)
                .await
                .map_err(|source| StoreError::MigrationFailed { index, source })?;
            tx.commit()
                .await
                .map_err(|source| StoreError::MigrationFailed { index, source })?;

            let next_version = i64::try_from(index + 1).unwrap_or(i64::MAX);
            sqlx::query(&format!("PRAGMA user_version = {next_version}"))
                .execute(&mut *conn)
                .await
                .map_err(|source| StoreError::MigrationFailed { index, source })?;
        }
        Ok(())
    }

    /// Returns the number of torrents currently persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailed`] if the query fails.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM torrents")
            .fetch_one(&self.pool)
            .await
            .map_err(|source| StoreError::QueryFailed {
                operation: "count",
                source,
            })
    }

    /// Loads every persisted torrent, in queue order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailed`] if the query fails, or
    /// [`StoreError::Decode`] if a row's JSON blob cannot be parsed.
    pub async fn load_all(&self) -> Result<Vec<TorrentRecord>> {
        let rows = sqlx::query(
            "SELECT info_hash_v1, info_hash_v2, name, save_path, queue_position, resume_blob, client_data_blob
             FROM torrents ORDER BY queue_position ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|source| StoreError::QueryFailed {
            operation: "load_all",
            source,
        })?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<TorrentRecord> {
        let v1: Option<String> = row.try_get("info_hash_v1").map_err(|source| StoreError::QueryFailed {
            operation: "decode info_hash_v1",
            source,
        })?;
        let v2: Option<String> = row.try_get("info_hash_v2").map_err(|source| StoreError::QueryFailed {
            operation: "decode info_hash_v2",
            source,
        })?;
        let info_hash = match (v1, v2) {
            (Some(v1), v2) => InfoHash { v1: Some(v1), v2 },
            (None, Some(v2)) => InfoHash { v1: None, v2: Some(v2) },
            (None, None) => return Err(StoreError::Decode { field: "info_hash" }),
        };

        let client_data_blob: Vec<u8> =
            row.try_get("client_data_blob").map_err(|source| StoreError::QueryFailed {
                operation: "decode client_data_blob",
                source,
            })?;
        let client_data: TorrentClientData =
            serde_json::from_slice(&client_data_blob).map_err(|_| StoreError::Decode {
                field: "client_data_blob",
            })?;

        Ok(TorrentRecord {
            info_hash,
            name: row.try_get("name").map_err(|source| StoreError::QueryFailed {
                operation: "decode name",
                source,
            })?,
            save_path: row.try_get("save_path").map_err(|source| StoreError::QueryFailed {
                operation: "decode save_path",
                source,
            })?,
            queue_position: row
                .try_get("queue_position")
                .map_err(|source| StoreError::QueryFailed {
                    operation: "decode queue_position",
                    source,
                })?,
            resume_blob: row.try_get("resume_blob").map_err(|source| StoreError::QueryFailed {
                operation: "decode resume_blob",
                source,
            })?,
            client_data,
        })
    }

    /// Inserts a new torrent record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] if a record with the same info
    /// hash already exists, or [`StoreError::QueryFailed`] on any other
    /// database error.
    pub async fn insert(&self, record: &TorrentRecord) -> Result<()> {
        let client_data_blob = serde_json::to_vec(&record.client_data).unwrap_or_default();
        let result = sqlx::query(
            "INSERT INTO torrents
                (info_hash_key, info_hash_v1, info_hash_v2, name, save_path, queue_position, resume_blob, client_data_blob)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.key())
        .bind(&record.info_hash.v1)
        .bind(&record.info_hash.v2)
        .bind(&record.name)
        .bind(&record.save_path)
        .bind(record.queue_position)
        .bind(&record.resume_blob)
        .bind(client_data_blob)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateKey { info_hash: record.key() })
            }
            Err(source) => Err(StoreError::QueryFailed {
                operation: "insert",
                source,
            }),
        }
    }

    /// Inserts or updates a torrent record (upsert semantics).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailed`] if the write fails.
    pub async fn update(&self, record: &TorrentRecord) -> Result<()> {
        let client_data_blob = serde_json::to_vec(&record.client_data).unwrap_or_default();
        sqlx::query(
            "INSERT INTO torrents
                (info_hash_key, info_hash_v1, info_hash_v2, name, save_path, queue_position, resume_blob, client_data_blob)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(info_hash_key) DO UPDATE SET
                info_hash_v1 = excluded.info_hash_v1,
                info_hash_v2 = excluded.info_hash_v2,
                name = excluded.name,
                save_path = excluded.save_path,
                queue_position = excluded.queue_position,
                resume_blob = excluded.resume_blob,
                client_data_blob = excluded.client_data_blob,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(record.key())
        .bind(&record.info_hash.v1)
        .bind(&record.info_hash.v2)
        .bind(&record.name)
        .bind(&record.save_path)
        .bind(record.queue_position)
        .bind(&record.resume_blob)
        .bind(client_data_blob)
        .execute(&self.pool)
        .await
        .map_err(|source| StoreError::QueryFailed {
            operation: "update",
            source,
        })?;
        Ok(())
    }

    /// Removes a torrent record. A no-op, not an error, if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailed`] if the delete fails.
    pub async fn remove(&self, info_hash: &InfoHash) -> Result<()> {
        sqlx::query("DELETE FROM torrents WHERE info_hash_key = ?")
            .bind(info_hash.to_string())
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::QueryFailed {
                operation: "remove",
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(queue_position: i64) -> TorrentRecord {
        TorrentRecord {
            info_hash: InfoHash {
                v1: Some(format!("{queue_position:040x}")),
                v2: None,
            },
            name: Some("example".to_string()),
            save_path: "/downloads".to_string(),
            queue_position,
            resume_blob: Some(vec![1, 2, 3]),
            client_data: TorrentClientData::default(),
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = TorrentStore::open(&path).await.unwrap();
        drop(store);
        let store = TorrentStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_then_load_round_trips() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        let record = sample(0);
        store.insert(&record).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[tokio::test]
    async fn insert_duplicate_is_rejected() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        let record = sample(0);
        store.insert(&record).await.unwrap();
        let err = store.insert(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn update_upserts_missing_record() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        let record = sample(0);
        store.update(&record).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_overwrites_existing_fields() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        let mut record = sample(0);
        store.insert(&record).await.unwrap();
        record.queue_position = 5;
        store.update(&record).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].queue_position, 5);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        let record = sample(0);
        store.insert(&record).await.unwrap();
        store.remove(&record.info_hash).await.unwrap();
        store.remove(&record.info_hash).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_all_orders_by_queue_position() {
        let store = TorrentStore::open_in_memory().await.unwrap();
        store.insert(&sample(2)).await.unwrap();
        store.insert(&sample(0)).await.unwrap();
        store.insert(&sample(1)).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        let positions: Vec<i64> = loaded.iter().map(|r| r.queue_position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }
}
