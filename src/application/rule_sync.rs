use crate::domain::models::{NativeBlockRule, UserPreferences};
use crate::domain::registry::{expired_sites, next_expiry, prune_expired};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::{
    PreferenceStore, StorageChange, USER_PREFERENCES_KEY, load_user_preferences_versioned,
    save_user_preferences, save_user_preferences_if_version,
};
use crate::infrastructure::rule_engine::{RuleEngine, RuleUpdate};
use crate::infrastructure::rule_mapper::{RuleSettings, encode_block_rule};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const COMMAND: &str = "update_blocking_rules";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub installed_rules: Vec<NativeBlockRule>,
    pub removed_rule_ids: Vec<u32>,
    /// Urls dropped from storage because their block ran out.
    pub expired: Vec<String>,
    pub persisted: bool,
    pub next_expiry: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
}

/// Mirrors the active blocked sites into the native rule set.
///
/// Every pass starts from the persisted document and the engine's current
/// rules, so a failed pass is simply retried by the next one.
pub struct RuleSynchronizer<S, E>
where
    S: PreferenceStore,
    E: RuleEngine,
{
    store: Arc<S>,
    engine: Arc<E>,
    settings: RuleSettings,
    log: Arc<ActivityLog>,
    now_provider: NowProvider,
}

impl<S, E> RuleSynchronizer<S, E>
where
    S: PreferenceStore,
    E: RuleEngine,
{
    pub fn new(store: Arc<S>, engine: Arc<E>) -> Self {
        Self {
            store,
            engine,
            settings: RuleSettings::default(),
            log: Arc::new(ActivityLog::disabled()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_settings(mut self, settings: RuleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_activity_log(mut self, log: Arc<ActivityLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn now_ms(&self) -> i64 {
        (self.now_provider)().timestamp_millis()
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome, InfraError> {
        let now = self.now_ms();
        let loaded = load_user_preferences_versioned(self.store.as_ref()).await?;
        let blocked_sites = &loaded.preferences.blocked_sites;
        let active_sites = prune_expired(blocked_sites, now);

        let removed_rule_ids: Vec<u32> = self
            .engine
            .get_dynamic_rules()
            .await?
            .iter()
            .map(|rule| rule.id)
            .collect();
        let installed_rules: Vec<NativeBlockRule> = active_sites
            .iter()
            .enumerate()
            .map(|(index, site)| encode_block_rule(site, index as u32 + 1, now, &self.settings))
            .collect();

        let update = RuleUpdate {
            remove_rule_ids: removed_rule_ids.clone(),
            add_rules: installed_rules.clone(),
        };
        if !update.is_empty() {
            self.engine.update_dynamic_rules(update).await?;
            self.log.info(
                COMMAND,
                &format!(
                    "removed {} rules, installed {} rules",
                    removed_rule_ids.len(),
                    installed_rules.len()
                ),
            );
        }

        let expired: Vec<String> = expired_sites(blocked_sites, now)
            .into_iter()
            .map(|site| site.url)
            .collect();
        let mut persisted = false;
        if active_sites.len() < blocked_sites.len() {
            let cleaned = UserPreferences {
                blocked_sites: active_sites.clone(),
                time_tracking: loaded.preferences.time_tracking.clone(),
            };
            match save_user_preferences_if_version(self.store.as_ref(), &cleaned, loaded.version).await {
                Ok(()) => {
                    persisted = true;
                    self.log.info(
                        COMMAND,
                        &format!("cleaned up expired blocks: {}", expired.join(", ")),
                    );
                }
                Err(InfraError::VersionConflict { key }) => {
                    self.log.warn(
                        COMMAND,
                        &format!("skipped expiry write-back, '{key}' changed during the pass"),
                    );
                }
                Err(error) => return Err(error),
            }
        }

        Ok(ReconcileOutcome {
            installed_rules,
            removed_rule_ids,
            expired,
            persisted,
            next_expiry: next_expiry(&active_sites, now),
        })
    }

    /// Runs a pass and swallows its failure after logging it.
    pub async fn reconcile_and_log(&self) -> Option<ReconcileOutcome> {
        match self.reconcile().await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                self.log
                    .error(COMMAND, &format!("error updating blocking rules: {error}"));
                None
            }
        }
    }

    /// A fresh install starts from empty preferences; an update keeps them.
    pub async fn on_installed(&self, reason: InstallReason) -> Result<ReconcileOutcome, InfraError> {
        if reason == InstallReason::Install {
            save_user_preferences(self.store.as_ref(), &UserPreferences::default()).await?;
            self.log.info("on_installed", "storage initialized");
        }
        self.reconcile().await
    }
}

/// How long the background loop may sleep: the polling interval, shortened so
/// the next expiry is picked up as soon as it happens.
pub fn next_wait(interval: Duration, next_expiry_ms: Option<i64>, now_ms: i64) -> Duration {
    match next_expiry_ms {
        Some(end) => {
            let until_expiry = Duration::from_millis(end.saturating_sub(now_ms).max(0) as u64);
            interval.min(until_expiry)
        }
        None => interval,
    }
}

enum Trigger {
    Timer,
    Changed,
    Shutdown,
}

/// Background trigger loop: one pass at start, then on every preferences
/// change and whenever the wait computed by [`next_wait`] elapses.
pub struct BackgroundService {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl BackgroundService {
    pub fn spawn<S, E>(synchronizer: Arc<RuleSynchronizer<S, E>>, interval: Duration) -> Self
    where
        S: PreferenceStore + 'static,
        E: RuleEngine + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut changes = Some(synchronizer.store().subscribe());

        let handle = tokio::spawn(async move {
            loop {
                let outcome = synchronizer.reconcile_and_log().await;
                let wait = next_wait(
                    interval,
                    outcome.and_then(|outcome| outcome.next_expiry),
                    synchronizer.now_ms(),
                );

                match wait_for_trigger(wait, &mut changes, &mut shutdown_rx).await {
                    Trigger::Shutdown => break,
                    Trigger::Timer | Trigger::Changed => {}
                }
            }
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

async fn wait_for_trigger(
    wait: Duration,
    changes: &mut Option<broadcast::Receiver<StorageChange>>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Trigger {
    let timer = sleep(wait);
    tokio::pin!(timer);

    loop {
        let received = tokio::select! {
            _ = &mut *shutdown => return Trigger::Shutdown,
            _ = &mut timer => return Trigger::Timer,
            received = next_change(changes) => received,
        };
        match received {
            Ok(change) if change.key == USER_PREFERENCES_KEY => return Trigger::Changed,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => return Trigger::Changed,
            Err(broadcast::error::RecvError::Closed) => *changes = None,
        }
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<StorageChange>>,
) -> Result<StorageChange, broadcast::error::RecvError> {
    match changes.as_mut() {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
