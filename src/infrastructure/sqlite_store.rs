use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::{PreferenceStore, StorageChange, Versioned};
use crate::infrastructure::storage::initialize_database;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable preference store: one row per key holding the JSON document and a
/// version that increases on every write.
#[derive(Debug)]
pub struct SqlitePreferenceStore {
    db_path: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl SqlitePreferenceStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let db_path = db_path.as_ref().to_path_buf();
        initialize_database(&db_path)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { db_path, changes })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Runs `operation` on the blocking pool so SQLite I/O and lock waits
    /// never stall the async workers.
    async fn run_blocking<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &broadcast::Sender<StorageChange>) -> Result<T, InfraError>
            + Send
            + 'static,
    {
        let db_path = self.db_path.clone();
        let changes = self.changes.clone();
        tokio::task::spawn_blocking(move || operation(&db_path, &changes))
            .await
            .map_err(|error| InfraError::Store(format!("preference store task failed: {error}")))?
    }
}

fn connect(db_path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(db_path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn read_entry(connection: &Connection, key: &str) -> Result<Option<Versioned>, InfraError> {
    let row: Option<(String, i64)> = connection
        .query_row(
            "SELECT value, version FROM preferences WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((raw, version)) = row else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(&raw)?;
    let version = u64::try_from(version).map_err(|_| {
        InfraError::Store(format!("invalid version {version} stored for '{key}'"))
    })?;
    Ok(Some(Versioned { value, version }))
}

fn write_entry(
    db_path: &Path,
    changes: &broadcast::Sender<StorageChange>,
    key: &str,
    expected: Option<Option<u64>>,
    value: Value,
) -> Result<u64, InfraError> {
    let mut connection = connect(db_path)?;
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = read_entry(&transaction, key)?;
    if let Some(expected) = expected {
        if current.as_ref().map(|entry| entry.version) != expected {
            return Err(InfraError::VersionConflict {
                key: key.to_string(),
            });
        }
    }

    let version = current.as_ref().map(|entry| entry.version + 1).unwrap_or(1);
    let stored_version = i64::try_from(version)
        .map_err(|_| InfraError::Store(format!("version overflow for '{key}'")))?;
    transaction.execute(
        "INSERT INTO preferences (key, value, version, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
           value = excluded.value,
           version = excluded.version,
           updated_at = excluded.updated_at",
        params![
            key,
            serde_json::to_string(&value)?,
            stored_version,
            Utc::now().to_rfc3339()
        ],
    )?;
    transaction.commit()?;

    let _ = changes.send(StorageChange {
        key: key.to_string(),
        old_value: current.map(|entry| entry.value),
        new_value: Some(value),
    });
    Ok(version)
}

#[async_trait]
impl PreferenceStore for SqlitePreferenceStore {
    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>, InfraError> {
        let key = key.to_string();
        self.run_blocking(move |db_path, _| read_entry(&connect(db_path)?, &key))
            .await
    }

    async fn set(&self, key: &str, value: Value) -> Result<u64, InfraError> {
        let key = key.to_string();
        self.run_blocking(move |db_path, changes| write_entry(db_path, changes, &key, None, value))
            .await
    }

    async fn set_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<u64, InfraError> {
        let key = key.to_string();
        self.run_blocking(move |db_path, changes| {
            write_entry(db_path, changes, &key, Some(expected), value)
        })
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BlockedSite, UserPreferences};
    use crate::infrastructure::preference_store::{
        load_user_preferences, load_user_preferences_versioned, save_user_preferences,
        save_user_preferences_if_version,
    };

    fn sample_preferences() -> UserPreferences {
        UserPreferences {
            blocked_sites: vec![BlockedSite::new("facebook.com", 5, 0)],
            ..UserPreferences::default()
        }
    }

    #[tokio::test]
    async fn preferences_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("siteblock.sqlite");

        let store = SqlitePreferenceStore::open(&path).expect("open store");
        save_user_preferences(&store, &sample_preferences())
            .await
            .expect("save");
        drop(store);

        let reopened = SqlitePreferenceStore::open(&path).expect("reopen store");
        let loaded = load_user_preferences(&reopened).await.expect("load");
        assert_eq!(loaded, sample_preferences());
    }

    #[tokio::test]
    async fn versioned_write_detects_conflict() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqlitePreferenceStore::open(dir.path().join("siteblock.sqlite"))
            .expect("open store");

        save_user_preferences_if_version(&store, &UserPreferences::default(), None)
            .await
            .expect("create document");
        let first = load_user_preferences_versioned(&store).await.expect("load");
        assert_eq!(first.version, Some(1));

        save_user_preferences(&store, &sample_preferences())
            .await
            .expect("concurrent write");
        let result =
            save_user_preferences_if_version(&store, &first.preferences, first.version).await;
        assert!(matches!(result, Err(InfraError::VersionConflict { .. })));

        let latest = load_user_preferences_versioned(&store).await.expect("load");
        assert_eq!(latest.version, Some(2));
        assert_eq!(latest.preferences, sample_preferences());
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqlitePreferenceStore::open(dir.path().join("siteblock.sqlite"))
            .expect("open store");
        let mut changes = store.subscribe();

        store
            .set("userPreferences", serde_json::json!({"blockedSites": []}))
            .await
            .expect("set");
        let change = changes.recv().await.expect("change");
        assert_eq!(change.key, "userPreferences");
        assert_eq!(change.old_value, None);
    }

    #[tokio::test]
    async fn write_waits_for_another_writer_to_release_the_lock() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqlitePreferenceStore::open(dir.path().join("siteblock.sqlite"))
            .expect("open store");

        let other = Connection::open(store.db_path()).expect("second connection");
        other
            .execute_batch("BEGIN IMMEDIATE")
            .expect("hold write lock");
        let release = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            other.execute_batch("COMMIT").expect("release write lock");
        });

        save_user_preferences(&store, &sample_preferences())
            .await
            .expect("write after lock is released");
        release.join().expect("releasing thread");

        let loaded = load_user_preferences(&store).await.expect("load");
        assert_eq!(loaded, sample_preferences());
    }
}
