use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub target: TargetConfig,
    pub proxies: ProxyConfig,
    pub browser: BrowserConfig,
    pub diagnostics: DiagnosticsConfig,
    pub notifications: NotificationsConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub origin: String,
    pub status_path: String,
    pub request_timeout: u64,
    pub challenge_rounds: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            origin: "https://passport.mfa.gov.ua".to_string(),
            status_path: "/Home/CurrentSessionStatus".to_string(),
            request_timeout: 15,
            challenge_rounds: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Candidate proxy URLs in priority order.
    pub candidates: Vec<String>,
    pub check_url: String,
    pub check_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            check_url: "https://www.gstatic.com/generate_204".to_string(),
            check_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub chrome_path: Option<String>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone: String,
    pub navigation_timeout: u64,
    pub attempt_timeout: u64,
    pub challenge_host_wait: u64,
    pub clearance_wait: u64,
    pub poll_interval_ms: u64,
    pub record_session: bool,
    pub max_workers: usize,
    pub attempt_backoff_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36"
                .to_string(),
            viewport_width: 1280,
            viewport_height: 800,
            locale: "en-US".to_string(),
            timezone: "Europe/Kiev".to_string(),
            navigation_timeout: 15,
            attempt_timeout: 60,
            challenge_host_wait: 20,
            clearance_wait: 25,
            poll_interval_ms: 1000,
            record_session: true,
            max_workers: 1,
            attempt_backoff_ms: 2000,
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout)
    }

    pub fn challenge_wait(&self) -> Duration {
        Duration::from_secs(self.challenge_host_wait.max(self.clearance_wait))
    }

    /// Upper bound for one browser attempt, including challenge recovery.
    pub fn attempt_budget(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout) + self.challenge_wait()
    }

    /// Time a cancelled worker gets to finish its current step and close
    /// the browser. Every blocking step is bounded by the navigation timeout
    /// or one poll interval.
    pub fn teardown_grace(&self) -> Duration {
        self.navigation_timeout() + Duration::from_millis(self.poll_interval_ms) + Duration::from_secs(5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticPolicy {
    EveryAttempt,
    FinalAttemptOnly,
}

impl DiagnosticPolicy {
    pub fn should_report(&self, is_final_attempt: bool) -> bool {
        match self {
            DiagnosticPolicy::EveryAttempt => true,
            DiagnosticPolicy::FinalAttemptOnly => is_final_attempt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub policy: DiagnosticPolicy,
    pub admin_chat_id: Option<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: DiagnosticPolicy::EveryAttempt,
            admin_chat_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram: TelegramConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub api_base: String,
    pub retry_attempts: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.telegram.org".to_string(),
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub base_url: String,
    pub topic_prefix: String,
    pub priority: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://ntfy.sh".to_string(),
            topic_prefix: "MFA".to_string(),
            priority: "urgent".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Six-field cron expression (seconds first).
    pub interval: String,
    pub check_timeout: u64,
    pub manual_cooldown_minutes: i64,
    pub privileged_cooldown_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: "0 0 * * * *".to_string(),
            check_timeout: 300,
            manual_cooldown_minutes: 60,
            privileged_cooldown_minutes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/watcher.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_prefix: "watcher".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("WATCHER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("proxies.candidates")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.target.origin).is_err() {
            return Err(ConfigError::Message("Invalid target origin URL".into()));
        }

        if !self.target.status_path.starts_with('/') {
            return Err(ConfigError::Message("Target status_path must start with '/'".into()));
        }

        if self.target.request_timeout == 0 {
            return Err(ConfigError::Message("Target request_timeout must be greater than 0".into()));
        }

        for candidate in &self.proxies.candidates {
            if Url::parse(candidate).is_err() {
                return Err(ConfigError::Message(format!("Invalid proxy URL: {}", candidate)));
            }
        }

        if self.proxies.check_timeout_ms == 0 {
            return Err(ConfigError::Message("Proxy check_timeout_ms must be greater than 0".into()));
        }

        if self.browser.navigation_timeout == 0 || self.browser.attempt_timeout == 0 {
            return Err(ConfigError::Message("Browser timeouts must be greater than 0".into()));
        }

        if self.browser.navigation_timeout > self.browser.attempt_timeout {
            return Err(ConfigError::Message(
                "Browser navigation_timeout cannot exceed attempt_timeout".into(),
            ));
        }

        if self.browser.poll_interval_ms == 0 {
            return Err(ConfigError::Message("Browser poll_interval_ms must be greater than 0".into()));
        }

        if self.browser.max_workers == 0 {
            return Err(ConfigError::Message("Browser max_workers must be greater than 0".into()));
        }

        if !Self::is_valid_cron(&self.scheduler.interval) {
            return Err(ConfigError::Message("Invalid cron expression in scheduler.interval".into()));
        }

        if self.scheduler.check_timeout == 0 {
            return Err(ConfigError::Message("Scheduler check_timeout must be greater than 0".into()));
        }

        if self.notifications.push.enabled && self.notifications.push.topic_prefix.is_empty() {
            return Err(ConfigError::Message("Push topic_prefix cannot be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }

    /// Six or seven whitespace-separated fields, seconds first.
    pub fn is_valid_cron(cron_expr: &str) -> bool {
        let parts: Vec<&str> = cron_expr.split_whitespace().collect();
        if parts.len() != 6 && parts.len() != 7 {
            return false;
        }

        parts.iter().all(|part| {
            part.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '-' | ',' | '/' | '?'))
        })
    }
}
