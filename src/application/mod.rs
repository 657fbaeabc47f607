pub mod blocked_page;
pub mod bootstrap;
pub mod countdown_timer;
pub mod periodic;
pub mod popup;
pub mod rule_sync;
pub mod state;
