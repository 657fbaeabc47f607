use crate::application::countdown_timer::CountdownTimer;
use crate::application::periodic::PeriodicTask;
use crate::domain::countdown::{Countdown, remaining_minutes_ceil};
use crate::domain::models::BlockedSite;
use crate::domain::registry::{find_site, normalize};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::preference_store::{PreferenceStore, load_user_preferences};
use crate::infrastructure::rule_mapper::BlockedPageAddress;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum BlockedPageState {
    /// Nothing to show: the address was unusable or no check has succeeded yet.
    Idle,
    Blocked {
        site: BlockedSite,
        remaining_minutes: u64,
    },
    /// The block is gone; navigate back to the site.
    Redirect(String),
}

/// Where to send the user once `site` is no longer blocked.
pub fn redirect_target(site: &str) -> String {
    let trimmed = site.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return trimmed.to_string();
    }
    format!("https://{}/", normalize(trimmed))
}

/// The page a blocking rule redirects to. It re-reads storage on each check
/// so an early removal or an expired block sends the user back right away.
pub struct BlockedPageView<S>
where
    S: PreferenceStore,
{
    store: Arc<S>,
    log: Arc<ActivityLog>,
    now_provider: NowProvider,
    address: Option<BlockedPageAddress>,
    state: BlockedPageState,
}

impl<S> BlockedPageView<S>
where
    S: PreferenceStore,
{
    pub fn open(store: Arc<S>, address_url: &str) -> Self {
        Self::open_with_log(store, address_url, Arc::new(ActivityLog::disabled()))
    }

    pub fn open_with_log(store: Arc<S>, address_url: &str, log: Arc<ActivityLog>) -> Self {
        let address = match BlockedPageAddress::parse(address_url) {
            Ok(address) => Some(address),
            Err(error) => {
                log.error("open_blocked_page", &error.to_string());
                None
            }
        };
        Self {
            store,
            log,
            now_provider: Arc::new(Utc::now),
            address,
            state: BlockedPageState::Idle,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn address(&self) -> Option<&BlockedPageAddress> {
        self.address.as_ref()
    }

    pub fn state(&self) -> &BlockedPageState {
        &self.state
    }

    fn now_ms(&self) -> i64 {
        (self.now_provider)().timestamp_millis()
    }

    /// A storage failure keeps the previous state.
    pub async fn check(&mut self) -> BlockedPageState {
        let Some(address) = self.address.clone() else {
            return BlockedPageState::Idle;
        };

        let preferences = match load_user_preferences(self.store.as_ref()).await {
            Ok(preferences) => preferences,
            Err(error) => {
                self.log
                    .error("check_blocked_site", &format!("error loading preferences: {error}"));
                return self.state.clone();
            }
        };

        let now = self.now_ms();
        self.state = match find_site(&preferences.blocked_sites, &address.site) {
            Some(site) if site.is_active_at(now) => BlockedPageState::Blocked {
                site: site.clone(),
                remaining_minutes: remaining_minutes_ceil(site.end_time, now),
            },
            Some(site) => BlockedPageState::Redirect(redirect_target(&site.url)),
            None => BlockedPageState::Redirect(redirect_target(&address.site)),
        };
        self.state.clone()
    }

    /// Switches a blocked view to the redirect it would reach on the next
    /// check once the block runs out.
    pub fn expire(&mut self) -> BlockedPageState {
        if let BlockedPageState::Blocked { site, .. } = &self.state {
            self.state = BlockedPageState::Redirect(redirect_target(&site.url));
        }
        self.state.clone()
    }

    /// Seconds left on the current block, counted from its stored end time.
    pub fn timer(&self) -> Option<Countdown> {
        match &self.state {
            BlockedPageState::Blocked { site, .. } => {
                Some(Countdown::until(site.end_time, self.now_ms()))
            }
            _ => None,
        }
    }
}

impl<S> BlockedPageView<S>
where
    S: PreferenceStore + 'static,
{
    pub fn spawn_refresh(view: Arc<Mutex<Self>>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn(period, move || {
            let view = Arc::clone(&view);
            async move {
                view.lock().await.check().await;
            }
        })
    }

    /// Counts down the current block and redirects the moment it reaches
    /// zero. `None` when the view is not showing a block.
    pub async fn spawn_timer(view: &Arc<Mutex<Self>>) -> Option<CountdownTimer> {
        let countdown = view.lock().await.timer()?;
        let view = Arc::clone(view);
        Some(CountdownTimer::start(countdown, |_| {}, move || {
            tokio::spawn(async move {
                view.lock().await.expire();
            });
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::preference_store::{
        InMemoryPreferenceStore, add_blocked_site, remove_blocked_site,
    };
    use crate::infrastructure::rule_mapper::blocked_page_url;
    use std::sync::atomic::{AtomicI64, Ordering};

    const PAGE: &str = "chrome-extension://siteblock/index.html";

    fn clock(now: &Arc<AtomicI64>) -> NowProvider {
        let now = Arc::clone(now);
        Arc::new(move || {
            DateTime::from_timestamp_millis(now.load(Ordering::SeqCst)).expect("valid timestamp")
        })
    }

    async fn seeded(site: BlockedSite) -> Arc<InMemoryPreferenceStore> {
        let store = Arc::new(InMemoryPreferenceStore::default());
        add_blocked_site(store.as_ref(), site).await.expect("seed");
        store
    }

    #[test]
    fn redirect_target_adds_scheme_only_when_missing() {
        assert_eq!(redirect_target("facebook.com"), "https://facebook.com/");
        assert_eq!(redirect_target("www.Facebook.com"), "https://facebook.com/");
        assert_eq!(
            redirect_target("http://example.com/path"),
            "http://example.com/path"
        );
    }

    #[tokio::test]
    async fn active_block_reports_remaining_time() {
        let store = seeded(BlockedSite::new("facebook.com", 5, 0)).await;
        let now = Arc::new(AtomicI64::new(90_000));
        let address = blocked_page_url(PAGE, "facebook.com", 4);
        let mut view = BlockedPageView::open(store, &address).with_now_provider(clock(&now));

        let state = view.check().await;
        match state {
            BlockedPageState::Blocked {
                site,
                remaining_minutes,
            } => {
                assert_eq!(site.url, "facebook.com");
                assert_eq!(remaining_minutes, 4);
            }
            other => panic!("expected blocked state, got {other:?}"),
        }
        let timer = view.timer().expect("timer while blocked");
        assert_eq!(timer.remaining_seconds(), 210);
    }

    #[tokio::test]
    async fn expired_block_redirects_to_site() {
        let store = seeded(BlockedSite::new("facebook.com", 1, 0)).await;
        let now = Arc::new(AtomicI64::new(60_000));
        let address = blocked_page_url(PAGE, "facebook.com", 1);
        let mut view = BlockedPageView::open(store, &address).with_now_provider(clock(&now));

        assert_eq!(
            view.check().await,
            BlockedPageState::Redirect("https://facebook.com/".to_string())
        );
        assert!(view.timer().is_none());
    }

    #[tokio::test]
    async fn early_removal_redirects_on_next_check() {
        let store = seeded(BlockedSite::new("a.com", 10, 0)).await;
        let now = Arc::new(AtomicI64::new(1_000));
        let address = blocked_page_url(PAGE, "a.com", 10);
        let mut view =
            BlockedPageView::open(Arc::clone(&store), &address).with_now_provider(clock(&now));

        assert!(matches!(view.check().await, BlockedPageState::Blocked { .. }));
        remove_blocked_site(store.as_ref(), "a.com").await.expect("remove");
        assert_eq!(
            view.check().await,
            BlockedPageState::Redirect("https://a.com/".to_string())
        );
    }

    #[tokio::test]
    async fn lookup_uses_normalized_host() {
        let store = seeded(BlockedSite::new("example.com", 10, 0)).await;
        let now = Arc::new(AtomicI64::new(0));
        let address = blocked_page_url(PAGE, "https://www.Example.com/", 10);
        let mut view = BlockedPageView::open(store, &address).with_now_provider(clock(&now));

        assert!(matches!(view.check().await, BlockedPageState::Blocked { .. }));
    }

    #[tokio::test]
    async fn malformed_address_stays_idle_and_logs() {
        let store = Arc::new(InMemoryPreferenceStore::default());
        let dir = tempfile::tempdir().expect("temp dir");
        let log = Arc::new(ActivityLog::new(dir.path()));
        let mut view = BlockedPageView::open_with_log(
            store,
            &format!("{PAGE}#blocked?timeLeft=3"),
            Arc::clone(&log),
        );

        assert!(view.address().is_none());
        assert_eq!(view.check().await, BlockedPageState::Idle);
        let raw = std::fs::read_to_string(log.path().expect("log path")).expect("read log");
        assert!(raw.contains("missing site parameter"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_task_notices_expiry() {
        let store = seeded(BlockedSite::new("a.com", 1, 0)).await;
        let now = Arc::new(AtomicI64::new(0));
        let address = blocked_page_url(PAGE, "a.com", 1);
        let view = Arc::new(Mutex::new(
            BlockedPageView::open(store, &address).with_now_provider(clock(&now)),
        ));
        let task = BlockedPageView::spawn_refresh(Arc::clone(&view), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(view.lock().await.state(), BlockedPageState::Blocked { .. }));

        now.store(60_000, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            view.lock().await.state(),
            &BlockedPageState::Redirect("https://a.com/".to_string())
        );
        task.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_redirects_when_block_runs_out() {
        let store = seeded(BlockedSite::new("a.com", 1, 0)).await;
        let now = Arc::new(AtomicI64::new(45_000));
        let address = blocked_page_url(PAGE, "a.com", 1);
        let view = Arc::new(Mutex::new(
            BlockedPageView::open(store, &address).with_now_provider(clock(&now)),
        ));
        assert!(matches!(view.lock().await.check().await, BlockedPageState::Blocked { .. }));

        let timer = BlockedPageView::spawn_timer(&view).await.expect("timer while blocked");
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(matches!(view.lock().await.state(), BlockedPageState::Blocked { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timer.is_finished());
        assert_eq!(
            view.lock().await.state(),
            &BlockedPageState::Redirect("https://a.com/".to_string())
        );
    }

    #[tokio::test]
    async fn no_timer_without_a_block() {
        let store = Arc::new(InMemoryPreferenceStore::default());
        let address = blocked_page_url(PAGE, "a.com", 1);
        let view = Arc::new(Mutex::new(BlockedPageView::open(store, &address)));

        assert!(BlockedPageView::spawn_timer(&view).await.is_none());
        assert_eq!(view.lock().await.expire(), BlockedPageState::Idle);
    }
}
