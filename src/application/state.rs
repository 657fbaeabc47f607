use crate::application::blocked_page::BlockedPageView;
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::countdown_timer::CountdownTimer;
use crate::application::periodic::PeriodicTask;
use crate::application::popup::{PopupController, SiteTimer};
use crate::application::rule_sync::{BackgroundService, InstallReason, ReconcileOutcome, RuleSynchronizer};
use crate::domain::countdown::Countdown;
use crate::domain::models::BlockedSite;
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::rule_engine::{InMemoryRuleEngine, RuleEngine};
use crate::infrastructure::rule_mapper::{RuleSettings, is_blocked_page};
use crate::infrastructure::sqlite_store::SqlitePreferenceStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedPopup = Arc<Mutex<PopupController<SqlitePreferenceStore>>>;
pub type SharedBlockedPage = Arc<Mutex<BlockedPageView<SqlitePreferenceStore>>>;

/// An open popup: the controller, its refresh task and one countdown per
/// listed site. Dropping it stops all of them.
pub struct PopupSession {
    controller: SharedPopup,
    timers: HashMap<String, CountdownTimer>,
    _refresh: PeriodicTask,
}

impl PopupSession {
    pub fn controller(&self) -> &SharedPopup {
        &self.controller
    }

    pub fn has_timer(&self, url: &str) -> bool {
        self.timers.contains_key(url)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub async fn add_site(&mut self, url: &str, hours: u32, minutes: u32) -> Option<BlockedSite> {
        let added = self.controller.lock().await.add_site(url, hours, minutes).await?;
        let timer = SiteTimer {
            url: added.url.clone(),
            countdown: Countdown::from_minutes(added.time_blocked),
        };
        self.timers.insert(
            added.url.clone(),
            PopupController::spawn_timer(Arc::clone(&self.controller), timer),
        );
        Some(added)
    }

    pub async fn remove_site(&mut self, url: &str) -> Option<BlockedSite> {
        let removed = self.controller.lock().await.remove_site(url).await?;
        self.timers.remove(&removed.url);
        Some(removed)
    }
}

/// An open blocked page with its refresh task and, while blocked, the
/// countdown that redirects at zero.
pub struct BlockedPageSession {
    view: SharedBlockedPage,
    timer: Option<CountdownTimer>,
    _refresh: PeriodicTask,
}

impl BlockedPageSession {
    pub fn view(&self) -> &SharedBlockedPage {
        &self.view
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }
}

pub enum Session {
    Popup(PopupSession),
    BlockedPage(BlockedPageSession),
}

/// Wires one workspace: the durable preference store, the activity log, the
/// loaded config and the synchronizer driving `engine`.
pub struct AppState<E>
where
    E: RuleEngine,
{
    workspace_root: PathBuf,
    config: EngineConfig,
    store: Arc<SqlitePreferenceStore>,
    log: Arc<ActivityLog>,
    engine: Arc<E>,
    synchronizer: Arc<RuleSynchronizer<SqlitePreferenceStore, E>>,
}

impl AppState<InMemoryRuleEngine> {
    /// Uses the bundled rule engine, sized by `maxDynamicRules`.
    pub fn with_in_memory_engine(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let engine = Arc::new(InMemoryRuleEngine::new(bootstrap.config.max_dynamic_rules));
        Self::from_bootstrap(bootstrap, engine)
    }
}

impl<E> AppState<E>
where
    E: RuleEngine + 'static,
{
    pub fn new(workspace_root: PathBuf, engine: Arc<E>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::from_bootstrap(bootstrap, engine)
    }

    fn from_bootstrap(bootstrap: BootstrapResult, engine: Arc<E>) -> Result<Self, InfraError> {
        let store = Arc::new(SqlitePreferenceStore::open(&bootstrap.database_path)?);
        let log = Arc::new(ActivityLog::new(&bootstrap.logs_dir));
        let synchronizer = RuleSynchronizer::new(Arc::clone(&store), Arc::clone(&engine))
            .with_settings(RuleSettings::from(&bootstrap.config))
            .with_activity_log(Arc::clone(&log));

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            config: bootstrap.config,
            store,
            log,
            engine,
            synchronizer: Arc::new(synchronizer),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqlitePreferenceStore> {
        &self.store
    }

    pub fn log(&self) -> &Arc<ActivityLog> {
        &self.log
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn synchronizer(&self) -> &Arc<RuleSynchronizer<SqlitePreferenceStore, E>> {
        &self.synchronizer
    }

    pub async fn on_installed(&self, reason: InstallReason) -> Result<ReconcileOutcome, InfraError> {
        self.synchronizer.on_installed(reason).await.inspect_err(|error| {
            self.log.error("on_installed", &error.to_string());
        })
    }

    pub fn start_background(&self) -> BackgroundService {
        BackgroundService::spawn(
            Arc::clone(&self.synchronizer),
            self.config.rule_sync_interval(),
        )
    }

    pub fn popup(&self) -> PopupController<SqlitePreferenceStore> {
        PopupController::new(Arc::clone(&self.store)).with_activity_log(Arc::clone(&self.log))
    }

    pub fn blocked_page(&self, address_url: &str) -> BlockedPageView<SqlitePreferenceStore> {
        BlockedPageView::open_with_log(Arc::clone(&self.store), address_url, Arc::clone(&self.log))
    }

    /// Opens whichever view `location` addresses: the blocked page for a
    /// `#blocked` route, the popup otherwise.
    pub async fn open(&self, location: &str) -> Session {
        if is_blocked_page(location) {
            Session::BlockedPage(self.open_blocked_page(location).await)
        } else {
            Session::Popup(self.open_popup().await)
        }
    }

    pub async fn open_popup(&self) -> PopupSession {
        let controller = Arc::new(Mutex::new(self.popup()));
        controller.lock().await.refresh().await;
        let timers = PopupController::spawn_timers(&controller).await.into_iter().collect();
        let refresh =
            PopupController::spawn_refresh(Arc::clone(&controller), self.config.popup_refresh_interval());
        PopupSession {
            controller,
            timers,
            _refresh: refresh,
        }
    }

    pub async fn open_blocked_page(&self, address_url: &str) -> BlockedPageSession {
        let view = Arc::new(Mutex::new(self.blocked_page(address_url)));
        view.lock().await.check().await;
        let timer = BlockedPageView::spawn_timer(&view).await;
        let refresh = BlockedPageView::spawn_refresh(
            Arc::clone(&view),
            self.config.blocked_page_refresh_interval(),
        );
        BlockedPageSession {
            view,
            timer,
            _refresh: refresh,
        }
    }
}
