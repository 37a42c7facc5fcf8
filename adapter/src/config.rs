use serde::{Deserialize, Serialize};
use thiserror::Error;

use botbridge_core::divergence::{Divergence, DivergenceRegistry, DivergenceStatus};

use crate::router::CapabilityTable;

const API_URL_ENV: &str = "BOTBRIDGE_API_URL";
const API_TOKEN_ENV: &str = "BOTBRIDGE_API_TOKEN";
const TIMEOUT_SECS_ENV: &str = "BOTBRIDGE_TIMEOUT_SECS";
const EDIT_MESSAGE_ENV: &str = "BOTBRIDGE_SUPPORTS_EDIT_MESSAGE";
const CHAT_ACTION_ENV: &str = "BOTBRIDGE_SUPPORTS_CHAT_ACTION";
const ANSWER_CALLBACK_ENV: &str = "BOTBRIDGE_SUPPORTS_ANSWER_CALLBACK";
const REPLY_REFERENCES_ENV: &str = "BOTBRIDGE_SUPPORTS_REPLY_REFERENCES";
const PARSE_MODE_ENV: &str = "BOTBRIDGE_SUPPORTS_PARSE_MODE";
const CALLBACK_NEEDS_CHAT_ENV: &str = "BOTBRIDGE_CALLBACK_NEEDS_CHAT";
const FIXED_DIVERGENCES_ENV: &str = "BOTBRIDGE_FIXED_DIVERGENCES";
const UNFIXED_DIVERGENCES_ENV: &str = "BOTBRIDGE_UNFIXED_DIVERGENCES";

const TIMEOUT_SECS_DEFAULT: u64 = 10;
const TIMEOUT_SECS_MIN: u64 = 1;
const TIMEOUT_SECS_MAX: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingEnv(&'static str),
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("unknown divergence key '{0}'")]
    UnknownDivergence(String),
}

/// Which upstream capabilities this deployment actually has. Everything
/// defaults to conformant; a quirky deployment turns things off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub edit_message: bool,
    pub chat_action: bool,
    pub answer_callback: bool,
    pub reply_references: bool,
    pub parse_mode: bool,
    pub callback_needs_chat: bool,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            edit_message: true,
            chat_action: true,
            answer_callback: true,
            reply_references: true,
            parse_mode: true,
            callback_needs_chat: false,
        }
    }
}

/// Adapter configuration. Loaded from env vars or a JSON config file; the
/// divergence override lists are the reviewed-change surface for marking an
/// upstream issue fixed (or regressed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub api_base_url: String,
    pub api_token: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
    /// Divergences observed fixed upstream since the built-in catalog.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_divergences: Vec<Divergence>,
    /// Divergences that regressed back to unfixed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unfixed_divergences: Vec<Divergence>,
}

fn default_timeout_secs() -> u64 {
    TIMEOUT_SECS_DEFAULT
}

impl AdapterConfig {
    /// Build from `BOTBRIDGE_*` env vars. Base url and token are required;
    /// everything else has conformant defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            std::env::var(API_URL_ENV).map_err(|_| ConfigError::MissingEnv(API_URL_ENV))?;
        let api_token =
            std::env::var(API_TOKEN_ENV).map_err(|_| ConfigError::MissingEnv(API_TOKEN_ENV))?;

        let (request_timeout_secs, _) = parse_env_u64_with_bounds(
            std::env::var(TIMEOUT_SECS_ENV).ok(),
            TIMEOUT_SECS_MIN,
            TIMEOUT_SECS_MAX,
            TIMEOUT_SECS_DEFAULT,
        );

        let capabilities = CapabilityConfig {
            edit_message: parse_env_bool_flag(std::env::var(EDIT_MESSAGE_ENV).ok(), true),
            chat_action: parse_env_bool_flag(std::env::var(CHAT_ACTION_ENV).ok(), true),
            answer_callback: parse_env_bool_flag(std::env::var(ANSWER_CALLBACK_ENV).ok(), true),
            reply_references: parse_env_bool_flag(std::env::var(REPLY_REFERENCES_ENV).ok(), true),
            parse_mode: parse_env_bool_flag(std::env::var(PARSE_MODE_ENV).ok(), true),
            callback_needs_chat: parse_env_bool_flag(
                std::env::var(CALLBACK_NEEDS_CHAT_ENV).ok(),
                false,
            ),
        };

        Ok(Self {
            api_base_url,
            api_token,
            request_timeout_secs,
            capabilities,
            fixed_divergences: parse_divergence_list(std::env::var(FIXED_DIVERGENCES_ENV).ok())?,
            unfixed_divergences: parse_divergence_list(
                std::env::var(UNFIXED_DIVERGENCES_ENV).ok(),
            )?,
        })
    }

    /// Load from a JSON config file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> std::path::PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("botbridge")
            .join("config.json")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.is_empty() {
            return Err(ConfigError::Parse("api_base_url is empty".into()));
        }
        if self.api_token.is_empty() {
            return Err(ConfigError::Parse("api_token is empty".into()));
        }
        if !(TIMEOUT_SECS_MIN..=TIMEOUT_SECS_MAX).contains(&self.request_timeout_secs) {
            return Err(ConfigError::Parse(format!(
                "request_timeout_secs out of range [{TIMEOUT_SECS_MIN}, {TIMEOUT_SECS_MAX}]"
            )));
        }
        Ok(())
    }

    /// Capability table for the router.
    pub fn capability_table(&self) -> CapabilityTable {
        let mut table = CapabilityTable::full();
        if !self.capabilities.edit_message {
            table = table.without_edit_message();
        }
        if !self.capabilities.chat_action {
            table = table.without_chat_action();
        }
        if !self.capabilities.answer_callback {
            table = table.without_answer_callback();
        }
        if !self.capabilities.reply_references {
            table = table.without_reply_references();
        }
        if !self.capabilities.parse_mode {
            table = table.without_parse_mode();
        }
        if self.capabilities.callback_needs_chat {
            table = table.with_callback_chat_requirement();
        }
        table
    }

    /// Divergence registry with this config's overrides applied.
    pub fn registry(&self) -> DivergenceRegistry {
        let registry = DivergenceRegistry::new();
        registry.apply_overrides(
            self.fixed_divergences
                .iter()
                .map(|d| (*d, DivergenceStatus::FixedObserved)),
        );
        registry.apply_overrides(
            self.unfixed_divergences
                .iter()
                .map(|d| (*d, DivergenceStatus::Unfixed)),
        );
        registry
    }
}

fn parse_divergence_list(raw: Option<String>) -> Result<Vec<Divergence>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|key| Divergence::parse(key).ok_or_else(|| ConfigError::UnknownDivergence(key.into())))
        .collect()
}

fn parse_env_bool_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

fn parse_env_u64_with_bounds(raw: Option<String>, min: u64, max: u64, default: u64) -> (u64, bool) {
    match raw.and_then(|value| value.parse::<u64>().ok()) {
        Some(parsed) => (parsed.clamp(min, max), true),
        None => (default, false),
    }
}

#[cfg(test)]
mod tests {
    use botbridge_core::divergence::Divergence;

    use super::*;

    #[test]
    fn divergence_list_parses_known_keys() {
        let parsed =
            parse_divergence_list(Some("group-id-prefix, string-ids".to_string())).unwrap();
        assert_eq!(
            parsed,
            vec![Divergence::GroupIdPrefix, Divergence::StringIds]
        );
        assert!(parse_divergence_list(Some("not-a-thing".to_string())).is_err());
        assert!(parse_divergence_list(None).unwrap().is_empty());
    }

    #[test]
    fn bool_flag_parsing_matches_common_spellings() {
        assert!(parse_env_bool_flag(Some("1".into()), false));
        assert!(parse_env_bool_flag(Some("True".into()), false));
        assert!(!parse_env_bool_flag(Some("off".into()), true));
        assert!(parse_env_bool_flag(None, true));
    }

    #[test]
    fn timeout_is_clamped_to_bounds() {
        assert_eq!(
            parse_env_u64_with_bounds(Some("999".into()), 1, 60, 10),
            (60, true)
        );
        assert_eq!(parse_env_u64_with_bounds(None, 1, 60, 10), (10, false));
    }

    #[test]
    fn config_overrides_reach_the_registry() {
        let config = AdapterConfig {
            api_base_url: "https://api.example".into(),
            api_token: "t".into(),
            request_timeout_secs: 10,
            capabilities: CapabilityConfig::default(),
            fixed_divergences: vec![Divergence::GroupIdPrefix],
            unfixed_divergences: vec![Divergence::ChatMissingKind],
        };
        let registry = config.registry();
        assert_eq!(
            registry.status(Divergence::GroupIdPrefix),
            DivergenceStatus::FixedObserved
        );
        assert_eq!(
            registry.status(Divergence::ChatMissingKind),
            DivergenceStatus::Unfixed
        );
    }

    #[test]
    fn json_config_round_trips() {
        let raw = r#"{
            "api_base_url": "https://bots.example",
            "api_token": "secret",
            "capabilities": { "edit_message": false, "parse_mode": false },
            "fixed_divergences": ["string-ids"]
        }"#;
        let config: AdapterConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.request_timeout_secs, TIMEOUT_SECS_DEFAULT);
        assert!(!config.capabilities.edit_message);
        assert!(config.capabilities.chat_action);
        assert_eq!(config.fixed_divergences, vec![Divergence::StringIds]);
    }
}
