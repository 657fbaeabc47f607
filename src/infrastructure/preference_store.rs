use crate::domain::models::{BlockedSite, UserPreferences};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

pub const USER_PREFERENCES_KEY: &str = "userPreferences";
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub version: u64,
}

/// Asynchronous key-value document store shared by every execution context.
///
/// Plain `set` is last-write-wins. `set_if_version` is the compare-and-swap
/// variant: `expected = None` means the key must not exist yet.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>, InfraError>;

    async fn set(&self, key: &str, value: Value) -> Result<u64, InfraError>;

    async fn set_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<u64, InfraError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;

    async fn get(&self, key: &str) -> Result<Option<Value>, InfraError> {
        Ok(self.get_versioned(key).await?.map(|entry| entry.value))
    }
}

#[derive(Debug)]
pub struct InMemoryPreferenceStore {
    entries: Mutex<HashMap<String, Versioned>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for InMemoryPreferenceStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl InMemoryPreferenceStore {
    fn write(
        &self,
        key: &str,
        expected: Option<Option<u64>>,
        value: Value,
    ) -> Result<u64, InfraError> {
        let (version, change) = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|error| InfraError::Store(format!("preference store lock poisoned: {error}")))?;
            let current = entries.get(key);
            if let Some(expected) = expected {
                if current.map(|entry| entry.version) != expected {
                    return Err(InfraError::VersionConflict {
                        key: key.to_string(),
                    });
                }
            }

            let old_value = current.map(|entry| entry.value.clone());
            let version = current.map(|entry| entry.version + 1).unwrap_or(1);
            entries.insert(
                key.to_string(),
                Versioned {
                    value: value.clone(),
                    version,
                },
            );
            (
                version,
                StorageChange {
                    key: key.to_string(),
                    old_value,
                    new_value: Some(value),
                },
            )
        };

        let _ = self.changes.send(change);
        Ok(version)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>, InfraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::Store(format!("preference store lock poisoned: {error}")))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<u64, InfraError> {
        self.write(key, None, value)
    }

    async fn set_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<u64, InfraError> {
        self.write(key, Some(expected), value)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Preferences plus the version they were read at (`None` when nothing has
/// been stored yet).
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPreferences {
    pub preferences: UserPreferences,
    pub version: Option<u64>,
}

pub async fn load_user_preferences_versioned<S>(store: &S) -> Result<LoadedPreferences, InfraError>
where
    S: PreferenceStore + ?Sized,
{
    let Some(entry) = store.get_versioned(USER_PREFERENCES_KEY).await? else {
        return Ok(LoadedPreferences {
            preferences: UserPreferences::default(),
            version: None,
        });
    };
    let preferences: UserPreferences = if entry.value.is_null() {
        UserPreferences::default()
    } else {
        serde_json::from_value(entry.value)?
    };
    preferences.validate().map_err(|error| {
        InfraError::Store(format!("corrupt '{USER_PREFERENCES_KEY}' document: {error}"))
    })?;
    Ok(LoadedPreferences {
        preferences,
        version: Some(entry.version),
    })
}

pub async fn load_user_preferences<S>(store: &S) -> Result<UserPreferences, InfraError>
where
    S: PreferenceStore + ?Sized,
{
    Ok(load_user_preferences_versioned(store).await?.preferences)
}

pub async fn save_user_preferences<S>(store: &S, preferences: &UserPreferences) -> Result<(), InfraError>
where
    S: PreferenceStore + ?Sized,
{
    store
        .set(USER_PREFERENCES_KEY, serde_json::to_value(preferences)?)
        .await?;
    Ok(())
}

pub async fn save_user_preferences_if_version<S>(
    store: &S,
    preferences: &UserPreferences,
    expected: Option<u64>,
) -> Result<(), InfraError>
where
    S: PreferenceStore + ?Sized,
{
    store
        .set_if_version(USER_PREFERENCES_KEY, expected, serde_json::to_value(preferences)?)
        .await?;
    Ok(())
}

pub async fn add_blocked_site<S>(store: &S, site: BlockedSite) -> Result<(), InfraError>
where
    S: PreferenceStore + ?Sized,
{
    let mut preferences = load_user_preferences(store).await?;
    preferences.blocked_sites.push(site);
    save_user_preferences(store, &preferences).await
}

/// Drops entries whose stored url equals `url` exactly.
pub async fn remove_blocked_site<S>(store: &S, url: &str) -> Result<(), InfraError>
where
    S: PreferenceStore + ?Sized,
{
    let mut preferences = load_user_preferences(store).await?;
    preferences.blocked_sites.retain(|site| site.url != url);
    save_user_preferences(store, &preferences).await
}

pub async fn update_time_tracking<S>(
    store: &S,
    url: &str,
    minutes: f64,
    now_ms: i64,
) -> Result<(), InfraError>
where
    S: PreferenceStore + ?Sized,
{
    let mut preferences = load_user_preferences(store).await?;
    let entry = preferences.time_tracking.entry(url.to_string()).or_default();
    entry.total_time_blocked += minutes.max(0.0);
    entry.last_blocked = now_ms;
    save_user_preferences(store, &preferences).await
}
