//! Centralised error type for the collector.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error on {0}: {1}")]
    Io(String, #[source] std::io::Error),

    /// The session store reported more API sessions than total active
    /// sessions. The difference feeds the channel-session figure, so a
    /// negative value means the store is inconsistent and the report
    /// would be wrong.
    #[error("Session accounting anomaly: {api} api sessions exceed {total} active sessions")]
    SessionAccounting { total: i64, api: i64 },
}
