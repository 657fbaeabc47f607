use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Preference store error: {0}")]
    Store(String),
    #[error("Rule engine rejected update: {0}")]
    RuleEngine(String),
    #[error("Invalid blocked page address: {0}")]
    InvalidAddress(String),
    #[error("Preference document '{key}' was modified concurrently")]
    VersionConflict { key: String },
}
