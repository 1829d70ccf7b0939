use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Notification error: {channel}: {message}")]
    Notification { channel: String, message: String },

    #[error("Fetch failed for {identifier}: {reason}")]
    Fetch { identifier: String, reason: String },

    #[error("Checked too recently, retry in {minutes} min")]
    Cooldown { minutes: i64 },

    #[error("Validation error: {0}")]
    Validation(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
