use crate::application::countdown_timer::CountdownTimer;
use crate::application::periodic::PeriodicTask;
use crate::domain::countdown::Countdown;
use crate::domain::models::{BlockedSite, UserPreferences};
use crate::domain::registry::{
    RegistryError, TimeTracking, accrue_time_on_removal, add_site, find_site, mark_blocked,
    prune_expired, remove_site,
};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::{
    PreferenceStore, load_user_preferences, save_user_preferences,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Combined block length from the form's hour and minute inputs.
pub fn total_minutes(hours: u32, minutes: u32) -> u32 {
    hours.saturating_mul(60).saturating_add(minutes)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteTimer {
    pub url: String,
    pub countdown: Countdown,
}

/// Foreground view state: the cached site list plus the add/remove handlers.
///
/// Handlers read the latest document, apply the change and write the whole
/// document back; a concurrent writer in another context can still overwrite
/// it (last write wins). Failures are logged and leave the cache on the last
/// successfully persisted state.
pub struct PopupController<S>
where
    S: PreferenceStore,
{
    store: Arc<S>,
    log: Arc<ActivityLog>,
    now_provider: NowProvider,
    blocked_sites: Vec<BlockedSite>,
    time_tracking: TimeTracking,
}

impl<S> PopupController<S>
where
    S: PreferenceStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            log: Arc::new(ActivityLog::disabled()),
            now_provider: Arc::new(Utc::now),
            blocked_sites: Vec::new(),
            time_tracking: TimeTracking::new(),
        }
    }

    pub fn with_activity_log(mut self, log: Arc<ActivityLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn now_ms(&self) -> i64 {
        (self.now_provider)().timestamp_millis()
    }

    pub fn blocked_sites(&self) -> &[BlockedSite] {
        &self.blocked_sites
    }

    pub fn time_tracking(&self) -> &TimeTracking {
        &self.time_tracking
    }

    /// One countdown per site, each starting from the site's full requested
    /// duration.
    pub fn site_timers(&self) -> Vec<SiteTimer> {
        self.blocked_sites
            .iter()
            .map(|site| SiteTimer {
                url: site.url.clone(),
                countdown: Countdown::from_minutes(site.time_blocked),
            })
            .collect()
    }

    pub async fn refresh(&mut self) -> bool {
        match load_user_preferences(self.store.as_ref()).await {
            Ok(preferences) => {
                let now = self.now_ms();
                self.blocked_sites = prune_expired(&preferences.blocked_sites, now);
                self.time_tracking = preferences.time_tracking;
                true
            }
            Err(error) => {
                self.log
                    .error("load_sites", &format!("error loading preferences: {error}"));
                false
            }
        }
    }

    pub async fn add_site(&mut self, url: &str, hours: u32, minutes: u32) -> Option<BlockedSite> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let now = self.now_ms();
        let result = self.try_add_site(url, total_minutes(hours, minutes), now).await;
        match result {
            Ok(site) => {
                self.log
                    .info("add_site", &format!("added blocked site {} until {}", site.url, site.end_time));
                Some(site)
            }
            Err(PopupError::Rejected(RegistryError::AlreadyBlocked(host))) => {
                self.log
                    .info("add_site", &format!("site is already blocked: {host}"));
                None
            }
            Err(PopupError::Rejected(error)) => {
                self.log.warn("add_site", &error.to_string());
                None
            }
            Err(PopupError::Infra(error)) => {
                self.log
                    .error("add_site", &format!("error saving preferences: {error}"));
                None
            }
        }
    }

    async fn try_add_site(&mut self, url: &str, minutes: u32, now: i64) -> Result<BlockedSite, PopupError> {
        let preferences = load_user_preferences(self.store.as_ref()).await?;
        let current = prune_expired(&preferences.blocked_sites, now);
        let blocked_sites = add_site(&current, url, minutes, now)?;
        let added = blocked_sites
            .last()
            .cloned()
            .ok_or(PopupError::Rejected(RegistryError::EmptyUrl))?;

        let updated = UserPreferences {
            blocked_sites,
            time_tracking: mark_blocked(&preferences.time_tracking, &added.url, now),
        };
        save_user_preferences(self.store.as_ref(), &updated).await?;
        self.apply(updated, now);
        Ok(added)
    }

    /// Removes the block and credits the time it actually ran.
    pub async fn remove_site(&mut self, url: &str) -> Option<BlockedSite> {
        let now = self.now_ms();
        match self.try_remove_site(url, now).await {
            Ok(Some(site)) => {
                self.log.info(
                    "remove_site",
                    &format!("removed {} and updated time tracking", site.url),
                );
                Some(site)
            }
            Ok(None) => None,
            Err(error) => {
                self.log
                    .error("remove_site", &format!("error saving preferences: {error}"));
                None
            }
        }
    }

    async fn try_remove_site(&mut self, url: &str, now: i64) -> Result<Option<BlockedSite>, InfraError> {
        let preferences = load_user_preferences(self.store.as_ref()).await?;
        let Some(removed) = find_site(&preferences.blocked_sites, url).cloned() else {
            self.apply(preferences, now);
            return Ok(None);
        };

        let updated = UserPreferences {
            blocked_sites: remove_site(&preferences.blocked_sites, url),
            time_tracking: accrue_time_on_removal(&preferences.time_tracking, &removed, now),
        };
        save_user_preferences(self.store.as_ref(), &updated).await?;
        self.apply(updated, now);
        Ok(Some(removed))
    }

    pub async fn timer_completed(&mut self, url: &str) -> Option<BlockedSite> {
        self.log.info("timer_completed", &format!("timer completed for {url}"));
        self.remove_site(url).await
    }

    fn apply(&mut self, preferences: UserPreferences, now: i64) {
        self.blocked_sites = prune_expired(&preferences.blocked_sites, now);
        self.time_tracking = preferences.time_tracking;
    }
}

impl<S> PopupController<S>
where
    S: PreferenceStore + 'static,
{
    /// Reloads the list right away and then every `period` while the returned
    /// task is alive.
    pub fn spawn_refresh(controller: Arc<Mutex<Self>>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn(period, move || {
            let controller = Arc::clone(&controller);
            async move {
                controller.lock().await.refresh().await;
            }
        })
    }

    /// Starts the countdown for one listed site. When it runs out the site is
    /// removed through [`PopupController::timer_completed`].
    pub fn spawn_timer(controller: Arc<Mutex<Self>>, timer: SiteTimer) -> CountdownTimer {
        let SiteTimer { url, countdown } = timer;
        CountdownTimer::start(countdown, |_| {}, move || {
            tokio::spawn(async move {
                controller.lock().await.timer_completed(&url).await;
            });
        })
    }

    /// One running countdown per currently listed site, keyed by url.
    pub async fn spawn_timers(controller: &Arc<Mutex<Self>>) -> Vec<(String, CountdownTimer)> {
        let timers = controller.lock().await.site_timers();
        timers
            .into_iter()
            .map(|timer| {
                let url = timer.url.clone();
                (url, Self::spawn_timer(Arc::clone(controller), timer))
            })
            .collect()
    }
}

#[derive(Debug)]
enum PopupError {
    Rejected(RegistryError),
    Infra(InfraError),
}

impl From<RegistryError> for PopupError {
    fn from(error: RegistryError) -> Self {
        Self::Rejected(error)
    }
}

impl From<InfraError> for PopupError {
    fn from(error: InfraError) -> Self {
        Self::Infra(error)
    }
}
