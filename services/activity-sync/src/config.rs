//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens themselves never live in the TOML; it only names the credential
//! file, which `STRAVA_ENV_FILE` can override.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use strava_api::HeartRateBand;
use strava_api::types::MAX_PER_PAGE;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub strava: StravaConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub heart_rate: HeartRateConfig,
}

/// Where the OAuth credential set is kept
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
}

/// Strava endpoints and HTTP settings
#[derive(Debug, Deserialize)]
pub struct StravaConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    /// Applies to every request, including token refresh
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// What to download and where to keep it
#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_sport_types")]
    pub sport_types: Vec<String>,
}

/// Heart rate band used for the pace summary
#[derive(Debug, Deserialize)]
pub struct HeartRateConfig {
    #[serde(default = "default_low_hr")]
    pub low: u16,
    #[serde(default = "default_high_hr")]
    pub high: u16,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
        }
    }
}

impl Default for StravaConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token_endpoint: default_token_endpoint(),
            timeout_secs: default_timeout(),
            per_page: default_per_page(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            sport_types: default_sport_types(),
        }
    }
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            low: default_low_hr(),
            high: default_high_hr(),
        }
    }
}

impl HeartRateConfig {
    pub fn band(&self) -> common::Result<HeartRateBand> {
        HeartRateBand::new(self.low, self.high)
            .map_err(|e| common::Error::Config(format!("heart_rate: {e}")))
    }
}

fn default_env_file() -> PathBuf {
    PathBuf::from(strava_auth::DEFAULT_ENV_FILE)
}

fn default_api_base_url() -> String {
    strava_api::API_BASE_URL.to_string()
}

fn default_token_endpoint() -> String {
    strava_auth::TOKEN_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_per_page() -> u32 {
    MAX_PER_PAGE
}

fn default_store_path() -> PathBuf {
    PathBuf::from("trainings.db")
}

fn default_sport_types() -> Vec<String> {
    vec!["Run".to_string()]
}

fn default_low_hr() -> u16 {
    100
}

fn default_high_hr() -> u16 {
    151
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            toml::from_str(&contents).map_err(|source| common::Error::Toml {
                path: path.to_path_buf(),
                source,
            })?;

        for (name, url) in [
            ("api_base_url", &config.strava.api_base_url),
            ("token_endpoint", &config.strava.token_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.strava.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_PER_PAGE).contains(&config.strava.per_page) {
            return Err(common::Error::Config(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}, got: {}",
                config.strava.per_page
            )));
        }

        config.heart_rate.band()?;

        if let Ok(env_file) = std::env::var("STRAVA_ENV_FILE") {
            config.credentials.env_file = PathBuf::from(env_file);
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("activity-sync.toml")
    }
}
