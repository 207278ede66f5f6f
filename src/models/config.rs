//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ComparisonKey, RecordField, Target};
use crate::pipeline::Trigger;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Change detection and polling policy
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// When cycles fire
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Page extraction backend
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Alert delivery
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// State persistence
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Monitored pages, processed in this order
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.notifier.bot_token = token.trim().to_string();
            }
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            let chat_id = chat_id.trim().to_string();
            if !chat_id.is_empty() && !self.notifier.chat_ids.contains(&chat_id) {
                self.notifier.chat_ids.push(chat_id);
            }
        }
    }

    /// Validate configuration values for basic sanity.
    ///
    /// Any error here is fatal: the monitor refuses to start.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(AppError::config("No targets defined"));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen.insert(target.url.as_str()) {
                return Err(AppError::config(format!(
                    "duplicate target url '{}'",
                    target.url
                )));
            }
        }

        let m = &self.monitor;
        if !m.threshold_percent.is_finite() || m.threshold_percent < 0.0 {
            return Err(AppError::config(
                "monitor.threshold_percent must be a non-negative number",
            ));
        }
        if m.retry_attempts == 0 {
            return Err(AppError::config("monitor.retry_attempts must be > 0"));
        }
        if m.default_timeout_ms == 0 {
            return Err(AppError::config("monitor.default_timeout_ms must be > 0"));
        }

        match (&self.trigger.interval_ms, &self.trigger.schedule) {
            (Some(_), Some(_)) => {
                return Err(AppError::config(
                    "trigger: set either interval_ms or schedule, not both",
                ));
            }
            (Some(0), None) => {
                return Err(AppError::config("trigger.interval_ms must be > 0"));
            }
            _ => {}
        }
        Trigger::from_config(&self.trigger)?;

        match self.extractor.kind {
            ExtractorKind::Session => {
                if self.extractor.user_agent.trim().is_empty() {
                    return Err(AppError::config("extractor.user_agent is empty"));
                }
                if self.extractor.selectors.row_selector.trim().is_empty() {
                    return Err(AppError::config("extractor.selectors.row_selector is empty"));
                }
            }
            ExtractorKind::Process => {
                if self.extractor.process.command.trim().is_empty() {
                    return Err(AppError::config("extractor.process.command is empty"));
                }
            }
        }

        if !m.suppress_delivery {
            if self.notifier.bot_token.trim().is_empty() {
                return Err(AppError::config(
                    "notifier.bot_token is empty (set TELEGRAM_BOT_TOKEN or use suppress_delivery)",
                ));
            }
            if self.notifier.chat_ids.is_empty() {
                return Err(AppError::config("notifier.chat_ids is empty"));
            }
        }
        Ok(())
    }
}

/// Change detection, retry and shutdown policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Relative change (percent) that counts as meaningful
    #[serde(default = "defaults::threshold_percent")]
    pub threshold_percent: f64,

    /// How records are matched between polls
    #[serde(default)]
    pub comparison_key: ComparisonKey,

    /// Whether shared positions are compared by value at all
    #[serde(default = "defaults::compare_values")]
    pub compare_values: bool,

    /// Numeric column compared against the threshold
    #[serde(default = "defaults::compare_field")]
    pub compare_field: RecordField,

    /// Extraction attempts per target per cycle
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,

    /// Per-attempt timeout unless a target overrides it
    #[serde(default = "defaults::default_timeout")]
    pub default_timeout_ms: u64,

    /// Run all comparison/state logic but never call the notifier
    #[serde(default)]
    pub suppress_delivery: bool,

    /// Whether an empty page after open positions is a closure event
    #[serde(default = "defaults::treat_empty_as_closure")]
    pub treat_empty_as_closure: bool,

    /// How long to wait for an in-flight cycle at shutdown
    #[serde(default = "defaults::shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl MonitorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_percent: defaults::threshold_percent(),
            comparison_key: ComparisonKey::default(),
            compare_values: defaults::compare_values(),
            compare_field: defaults::compare_field(),
            retry_attempts: defaults::retry_attempts(),
            retry_delay_ms: defaults::retry_delay(),
            default_timeout_ms: defaults::default_timeout(),
            suppress_delivery: false,
            treat_empty_as_closure: defaults::treat_empty_as_closure(),
            shutdown_grace_secs: defaults::shutdown_grace(),
        }
    }
}

/// Either a fixed interval or a cron expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub interval_ms: Option<u64>,

    /// Cron expression; five fields are accepted
    #[serde(default)]
    pub schedule: Option<String>,

    /// Fire one cycle immediately when using an interval
    #[serde(default = "defaults::run_on_start")]
    pub run_on_start: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval_ms: None,
            schedule: None,
            run_on_start: defaults::run_on_start(),
        }
    }
}

/// Which extractor implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// One reusable HTTP session
    #[default]
    Session,
    /// An isolated worker process per poll
    Process,
}

/// Extraction backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default)]
    pub kind: ExtractorKind,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub selectors: TableSelectors,

    #[serde(default)]
    pub process: ProcessConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: ExtractorKind::default(),
            user_agent: defaults::user_agent(),
            selectors: TableSelectors::default(),
            process: ProcessConfig::default(),
        }
    }
}

/// CSS selectors for the positions table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSelectors {
    /// Selector for each position row
    #[serde(default = "defaults::row_selector")]
    pub row_selector: String,

    /// Selector for the cells within a row
    #[serde(default = "defaults::cell_selector")]
    pub cell_selector: String,

    /// Selector for the token cell within a row
    #[serde(default = "defaults::token_cell_selector")]
    pub token_cell_selector: String,

    /// Symbol label inside the token cell
    #[serde(default = "defaults::token_name_selector")]
    pub token_name_selector: String,

    /// Leverage label inside the token cell
    #[serde(default = "defaults::leverage_selector")]
    pub leverage_selector: String,

    /// Text shown by the page when no positions are open
    #[serde(default = "defaults::empty_marker")]
    pub empty_marker: Option<String>,
}

impl Default for TableSelectors {
    fn default() -> Self {
        Self {
            row_selector: defaults::row_selector(),
            cell_selector: defaults::cell_selector(),
            token_cell_selector: defaults::token_cell_selector(),
            token_name_selector: defaults::token_name_selector(),
            leverage_selector: defaults::leverage_selector(),
            empty_marker: defaults::empty_marker(),
        }
    }
}

/// Worker command for the process extractor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessConfig {
    /// Executable, e.g. "node"
    #[serde(default)]
    pub command: String,

    /// Arguments, e.g. ["worker.js"]
    #[serde(default)]
    pub args: Vec<String>,
}

/// Telegram delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub bot_token: String,

    /// Destination chat ids
    #[serde(default)]
    pub chat_ids: Vec<String>,

    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    #[serde(default = "defaults::delivery_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_ids: Vec::new(),
            api_base: defaults::api_base(),
            timeout_secs: defaults::delivery_timeout(),
        }
    }
}

/// State persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State file relative to the storage dir; None keeps state in memory only
    #[serde(default = "defaults::state_file")]
    pub state_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: defaults::state_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use crate::models::RecordField;

    // Monitor defaults
    pub fn threshold_percent() -> f64 {
        5.0
    }
    pub fn compare_values() -> bool {
        true
    }
    pub fn compare_field() -> RecordField {
        RecordField::Size
    }
    pub fn retry_attempts() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        2000
    }
    pub fn default_timeout() -> u64 {
        60_000
    }
    pub fn treat_empty_as_closure() -> bool {
        true
    }
    pub fn shutdown_grace() -> u64 {
        30
    }

    // Trigger defaults
    pub fn run_on_start() -> bool {
        true
    }

    // Extractor defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; position-watch/0.1)".into()
    }
    pub fn row_selector() -> String {
        r#"tr[data-qa^="position-item-"]"#.into()
    }
    pub fn cell_selector() -> String {
        "td".into()
    }
    pub fn token_cell_selector() -> String {
        r#"td[data-qa="position-handle"]"#.into()
    }
    pub fn token_name_selector() -> String {
        ".Exchange-list-title".into()
    }
    pub fn leverage_selector() -> String {
        ".Exchange-list-info-label".into()
    }
    pub fn empty_marker() -> Option<String> {
        Some("No open positions".into())
    }

    // Notifier defaults
    pub fn api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn delivery_timeout() -> u64 {
        15
    }

    // Storage defaults
    pub fn state_file() -> Option<String> {
        Some("state.json".into())
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
