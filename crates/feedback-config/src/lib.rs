//! Typed configuration for the feedback pipeline (SPEC_FULL.md §6, §6.1, §9).
//!
//! Loaded from a TOML file (default `./config.toml`, overridable via the
//! `FEEDBACK_CONFIG` environment variable) overlaid with `FEEDBACK_`-prefixed
//! environment variables, `__`-separated for nesting. Unknown keys are
//! rejected at startup with a diagnostic naming the offending key.

use serde::{de::Error as _, Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("configuration invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSettings {
    #[serde(default = "default_orchestrator_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_approval_timeout", deserialize_with = "deserialize_duration")]
    pub approval_timeout: Duration,
    #[serde(default = "default_activity_timeout", deserialize_with = "deserialize_duration")]
    pub activity_start_to_close: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerSettings {
    #[serde(default = "default_analyzer_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_similarity_threshold")]
    pub dedup_similarity_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSettings {
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub feedback_topic: String,
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialSettings {
    pub chat_bot_credential: Option<String>,
    pub tracker_credential: Option<String>,
    pub tracker_target: Option<String>,
    #[serde(default)]
    pub auto_approve_on_soft_skip: bool,
    /// Endpoint the chat bot posts review cards to (§4.3).
    #[serde(default = "default_chat_post_message_url")]
    pub chat_post_message_url: String,
    /// Endpoint the chat bot acknowledges button interactions on (§4.7).
    #[serde(default = "default_chat_interaction_ack_url")]
    pub chat_interaction_ack_url: String,
    /// Endpoint the tracker client creates issues against (§4.4).
    #[serde(default = "default_tracker_create_issue_url")]
    pub tracker_create_issue_url: String,
    /// Endpoint the tracker client searches for a recoverable issue on 409 (§4.4, L3).
    #[serde(default = "default_tracker_search_issues_url")]
    pub tracker_search_issues_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_shutdown_grace", deserialize_with = "deserialize_duration")]
    pub shutdown_grace_period: Duration,
    /// Hex-encoded Ed25519 verifying key for source-A webhook signatures (§4.5).
    pub source_a_verifying_key: Option<String>,
    /// Shared secret for source-B HMAC-SHA-256 webhook signatures (§4.5).
    pub source_b_hmac_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub orchestrator: OrchestratorSettingsOrDefault,
    #[serde(default)]
    pub analyzer: AnalyzerSettingsOrDefault,
    #[serde(default)]
    pub broker: BrokerSettingsOrDefault,
    #[serde(default)]
    pub http: HttpSettingsOrDefault,
    #[serde(default)]
    pub credentials: CredentialSettingsOrDefault,
}

// `config`/serde default-for-nested-struct plumbing: a struct's `Default` must
// be derivable without a `Deserialize` context, so each section gets a
// newtype wrapper providing `Default` in terms of the same `default_*`
// functions used for individual fields.
macro_rules! default_wrapper {
    ($wrapper:ident, $inner:ty, $ctor:expr) => {
        #[derive(Debug, Clone, Deserialize)]
        #[serde(transparent)]
        pub struct $wrapper(pub $inner);

        impl Default for $wrapper {
            fn default() -> Self {
                $wrapper($ctor)
            }
        }

        impl std::ops::Deref for $wrapper {
            type Target = $inner;
            fn deref(&self) -> &$inner {
                &self.0
            }
        }
    };
}

default_wrapper!(
    OrchestratorSettingsOrDefault,
    OrchestratorSettings,
    OrchestratorSettings {
        endpoint: default_orchestrator_endpoint(),
        namespace: default_namespace(),
        approval_timeout: default_approval_timeout(),
        activity_start_to_close: default_activity_timeout(),
    }
);
default_wrapper!(
    AnalyzerSettingsOrDefault,
    AnalyzerSettings,
    AnalyzerSettings {
        endpoint: default_analyzer_endpoint(),
        dedup_similarity_threshold: default_similarity_threshold(),
    }
);
default_wrapper!(
    BrokerSettingsOrDefault,
    BrokerSettings,
    BrokerSettings {
        brokers: default_brokers(),
        feedback_topic: default_topic(),
        task_queue: default_task_queue(),
    }
);
default_wrapper!(
    HttpSettingsOrDefault,
    HttpSettings,
    HttpSettings {
        bind_address: default_bind_address(),
        shutdown_grace_period: default_shutdown_grace(),
        source_a_verifying_key: None,
        source_b_hmac_secret: None,
    }
);
default_wrapper!(
    CredentialSettingsOrDefault,
    CredentialSettings,
    CredentialSettings {
        chat_bot_credential: None,
        tracker_credential: None,
        tracker_target: None,
        auto_approve_on_soft_skip: false,
        chat_post_message_url: default_chat_post_message_url(),
        chat_interaction_ack_url: default_chat_interaction_ack_url(),
        tracker_create_issue_url: default_tracker_create_issue_url(),
        tracker_search_issues_url: default_tracker_search_issues_url(),
    }
);

fn default_orchestrator_endpoint() -> String {
    "localhost:7233".into()
}
fn default_namespace() -> String {
    "default".into()
}
fn default_analyzer_endpoint() -> String {
    "localhost:50051".into()
}
fn default_brokers() -> String {
    "localhost:9092".into()
}
fn default_topic() -> String {
    "feedback-events".into()
}
fn default_task_queue() -> String {
    "feedback-queue".into()
}
fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_log_level() -> String {
    "info".into()
}
fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_chat_post_message_url() -> String {
    "https://chat.example.invalid/api/messages".into()
}
fn default_chat_interaction_ack_url() -> String {
    "https://chat.example.invalid/api/interactions/ack".into()
}
fn default_tracker_create_issue_url() -> String {
    "https://tracker.example.invalid/api/issues".into()
}
fn default_tracker_search_issues_url() -> String {
    "https://tracker.example.invalid/api/issues/search".into()
}
fn default_approval_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_activity_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

/// Parses the `"5m"` / `"2m"` / `"10s"` notation used throughout §6 into a
/// [`Duration`]. Supports a trailing `s`, `m`, or `h` unit; no unit suffix is
/// interpreted as seconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(D::Error::custom)
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit_secs) = if let Some(stripped) = raw.strip_suffix('h') {
        (stripped, 3600)
    } else if let Some(stripped) = raw.strip_suffix('m') {
        (stripped, 60)
    } else if let Some(stripped) = raw.strip_suffix('s') {
        (stripped, 1)
    } else {
        (raw, 1)
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration literal: {raw:?}"))?;
    Ok(Duration::from_secs(value * unit_secs))
}

impl Settings {
    /// Loads settings from `path` (default `./config.toml`, or the
    /// `FEEDBACK_CONFIG` env var if set) overlaid with `FEEDBACK_`-prefixed
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FEEDBACK_CONFIG").unwrap_or_else(|_| "config.toml".into());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("FEEDBACK")
                    .separator("__")
                    .try_parsing(true),
            );
        let raw = builder.build()?;
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Fatal-at-startup validation: orchestrator/broker/analyzer endpoints
    /// are mandatory (§6 "Missing credentials degrade gracefully... but
    /// missing orchestrator/broker/analyzer are fatal at startup").
    fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("orchestrator.endpoint must not be empty".into()));
        }
        if self.broker.brokers.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.brokers must not be empty".into()));
        }
        if self.analyzer.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("analyzer.endpoint must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.analyzer.dedup_similarity_threshold) {
            return Err(ConfigError::Invalid(
                "analyzer.dedup_similarity_threshold must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_spec_table() {
        let s = Settings::load_from("/nonexistent-config-path.toml").expect("defaults load");
        assert_eq!(s.orchestrator.endpoint, "localhost:7233");
        assert_eq!(s.analyzer.endpoint, "localhost:50051");
        assert_eq!(s.broker.brokers, "localhost:9092");
        assert_eq!(s.broker.feedback_topic, "feedback-events");
        assert_eq!(s.orchestrator.approval_timeout, Duration::from_secs(300));
        assert_eq!(s.orchestrator.activity_start_to_close, Duration::from_secs(120));
        assert!(!s.credentials.auto_approve_on_soft_skip);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bogus_top_level_key = true").unwrap();
        let path = file.path().with_extension("toml");
        std::fs::copy(file.path(), &path).unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap();
        let dir = path.parent().unwrap();
        let result = Settings::load_from(&dir.join(stem).to_string_lossy());
        assert!(result.is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duration_parsing_supports_spec_notation() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("not-a-duration").is_err());
    }
}
