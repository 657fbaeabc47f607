pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::blocked_page::{BlockedPageState, BlockedPageView};
pub use application::bootstrap::{BootstrapResult, bootstrap_workspace};
pub use application::countdown_timer::CountdownTimer;
pub use application::popup::PopupController;
pub use application::rule_sync::{
    BackgroundService, InstallReason, ReconcileOutcome, RuleSynchronizer,
};
pub use application::state::{AppState, BlockedPageSession, PopupSession, Session};
pub use domain::countdown::Countdown;
pub use domain::models::{BlockedSite, NativeBlockRule, TimeTrackingEntry, UserPreferences};
pub use infrastructure::config::EngineConfig;
pub use infrastructure::error::InfraError;
pub use infrastructure::preference_store::{InMemoryPreferenceStore, PreferenceStore};
pub use infrastructure::rule_engine::{InMemoryRuleEngine, RuleEngine, RuleUpdate};
pub use infrastructure::sqlite_store::SqlitePreferenceStore;
