pub mod activity_log;
pub mod config;
pub mod error;
pub mod preference_store;
pub mod rule_engine;
pub mod rule_mapper;
pub mod sqlite_store;
pub mod storage;
