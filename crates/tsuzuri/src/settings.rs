//! Layered runtime settings.
//!
//! Sources, lowest precedence first:
//! - bundled defaults (`tsuzuri.toml` compiled into the crate)
//! - `./tsuzuri.toml`, if present
//! - `TSUZURI_*` environment variables, `__` separating sections
//!   (`TSUZURI_RETRY__ATTEMPTS=3`)

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tsuzuri_core::{RetryPolicy, RetryPolicyError};

const DEFAULT_SETTINGS: &str = include_str!("../tsuzuri.toml");

/// Errors raised while loading settings or building objects from them.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A settings source could not be read or deserialized.
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    /// The environment variable named by `api_key_env` is unset.
    #[error("Environment variable '{0}' with the API key is not set")]
    MissingApiKey(String),

    /// The retry section does not form a valid policy.
    #[error("Invalid retry settings: {0}")]
    Retry(#[from] RetryPolicyError),
}

/// Gemini backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiSettings {
    /// Model name, e.g. `gemini-2.0-flash`.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Overrides the public endpoint when set.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Retry settings in the shape used by configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry, in seconds.
    pub initial_delay_secs: f64,
    /// Multiplier applied to the delay after each retry.
    pub exp_base: u32,
    /// Statuses that are retried.
    pub http_status_codes: Vec<u16>,
    /// Upper bound on any single delay, in seconds.
    #[serde(default)]
    pub max_delay_secs: Option<f64>,
}

impl RetrySettings {
    /// Builds the validated policy.
    pub fn to_policy(&self) -> Result<RetryPolicy, RetryPolicyError> {
        let initial_delay = seconds(self.initial_delay_secs)?;
        let policy = RetryPolicy::exponential(
            self.attempts,
            initial_delay,
            self.exp_base,
            self.http_status_codes.iter().copied(),
        )?;
        match self.max_delay_secs {
            Some(secs) => policy.with_max_delay(seconds(secs)?),
            None => Ok(policy),
        }
    }
}

fn seconds(secs: f64) -> Result<Duration, RetryPolicyError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(RetryPolicyError("delays must be finite and non-negative"));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Settings shared by the bundled pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Iteration limit of every refinement loop.
    pub max_refinement_iterations: u32,
    /// Critique text that approves a draft.
    pub approval_phrase: String,
}

/// All runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// The `[gemini]` table.
    pub gemini: GeminiSettings,
    /// The `[retry]` table.
    pub retry: RetrySettings,
    /// The `[pipeline]` table.
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Loads defaults, `./tsuzuri.toml` and `TSUZURI_*` variables.
    pub fn load() -> Result<Self, SettingsError> {
        let settings = Self::defaults_builder()
            .add_source(File::with_name("tsuzuri").required(false))
            .add_source(
                Environment::with_prefix("TSUZURI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Loads defaults overridden by the file at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings = Self::defaults_builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Loads defaults overridden by TOML text.
    pub fn from_toml_str(toml: &str) -> Result<Self, SettingsError> {
        let settings = Self::defaults_builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Bundled defaults only.
    pub fn bundled() -> Result<Self, SettingsError> {
        Self::from_toml_str("")
    }

    fn defaults_builder() -> config::builder::ConfigBuilder<config::builder::DefaultState> {
        Config::builder().add_source(File::from_str(DEFAULT_SETTINGS, FileFormat::Toml))
    }

    /// The retry policy every generation step uses.
    pub fn retry_policy(&self) -> Result<RetryPolicy, SettingsError> {
        Ok(self.retry.to_policy()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_defaults_match_gemini_policy() {
        let settings = Settings::bundled().expect("bundled settings parse");

        assert_eq!(settings.gemini.model, "gemini-2.0-flash");
        assert_eq!(settings.gemini.api_key_env, "GEMINI_API_KEY");
        assert_eq!(settings.pipeline.max_refinement_iterations, 2);
        assert_eq!(settings.pipeline.approval_phrase, "APPROVED");
        assert_eq!(
            settings.retry_policy().expect("valid policy"),
            RetryPolicy::gemini_default()
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [retry]
            attempts = 3
            http_status_codes = [503, 429]
            "#,
        )
        .expect("parses");

        let policy = settings.retry_policy().expect("valid policy");
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(7));
        assert!(policy.retry_on().contains(&503));
        assert_eq!(settings.gemini.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_invalid_retry_settings() {
        let settings = Settings::from_toml_str(
            r#"
            [retry]
            exp_base = 11
            "#,
        )
        .expect("parses");
        assert!(matches!(
            settings.retry_policy(),
            Err(SettingsError::Retry(_))
        ));

        let negative = RetrySettings {
            attempts: 2,
            initial_delay_secs: -1.0,
            exp_base: 2,
            http_status_codes: vec![],
            max_delay_secs: None,
        };
        assert!(negative.to_policy().is_err());
    }

    #[test]
    fn test_max_delay_cap() {
        let retry = RetrySettings {
            attempts: 4,
            initial_delay_secs: 2.0,
            exp_base: 3,
            http_status_codes: vec![503],
            max_delay_secs: Some(10.0),
        };

        let policy = retry.to_policy().expect("valid policy");
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
    }

    #[test]
    fn test_malformed_toml_is_load_error() {
        let result = Settings::from_toml_str("[retry\nattempts = ");
        assert!(matches!(result, Err(SettingsError::Load(_))));
    }
}
