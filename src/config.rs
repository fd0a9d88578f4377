//! Configuration loading and validation.
//!
//! Configuration is read once at process start from an optional TOML file,
//! then overlaid with environment variables. The resulting [`Config`] is
//! immutable and passed explicitly into [`Pipeline::new`](crate::pipeline::Pipeline::new);
//! nothing reads the environment while a request is in flight.
//!
//! # Environment overrides
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `OPENROUTER_API_KEY` (or `provider.api_key_env`) | provider credential |
//! | `OPENROUTER_BASE_URL` | `provider.base_url` |
//! | `OPENROUTER_MODEL` | `provider.model` |
//! | `EXPLAINER_ALLOWED_ORIGINS` | `cors.allowed_origins` (comma separated) |
//! | `EXPLAINER_DEV_MODE` | `server.dev_mode` (`1` or `true`) |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config/explainer.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Include raw provider bodies and transport error chains in error details.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            dev_mode: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Required credential prefix. Empty disables the prefix check.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    /// Attribution referer. Falls back to the inbound `Host` header.
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default = "default_app_title")]
    pub app_title: String,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// Resolved from the environment by [`load_config`]; never read from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            key_prefix: default_key_prefix(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            site_url: None,
            app_title: default_app_title(),
            prompt_template: default_prompt_template(),
            api_key: None,
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "google/gemini-flash-1.5".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_key_prefix() -> String {
    "sk-or-".to_string()
}
fn default_temperature() -> Option<f32> {
    Some(0.3)
}
fn default_max_tokens() -> Option<u32> {
    Some(500)
}
fn default_app_title() -> String {
    "AI PDF Explainer".to_string()
}
fn default_prompt_template() -> String {
    "Explain the following text from page {page_number} of a PDF. \
     Be concise, clear, and focus on the main points (around 100-150 words).\n\n\
     TEXT: \"{text}\""
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_text_len: default_min_text_len(),
            max_text_len: default_max_text_len(),
        }
    }
}

fn default_min_text_len() -> usize {
    10
}
fn default_max_text_len() -> usize {
    15_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Optional wall-clock cap across all attempts and backoff sleeps.
    #[serde(default)]
    pub overall_timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            overall_timeout_ms: None,
        }
    }
}

fn default_attempt_timeout_ms() -> u64 {
    20_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}

impl DispatchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Upper bound on distinct client keys tracked at once.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            capacity: default_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_window_secs() -> u64 {
    60
}
fn default_max_requests() -> u32 {
    10
}
fn default_capacity() -> usize {
    10_000
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_max_age_secs() -> u64 {
    86_400
}

/// Outcome of checking the provider credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    Missing,
    Malformed,
}

impl ProviderConfig {
    pub fn credential_status(&self) -> CredentialStatus {
        match self.api_key.as_deref().map(str::trim) {
            None | Some("") => CredentialStatus::Missing,
            Some(key) if !key.starts_with(&self.key_prefix) => CredentialStatus::Malformed,
            Some(_) => CredentialStatus::Valid,
        }
    }

    /// Last eight characters of the credential, for log lines.
    pub fn masked_key(&self) -> String {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => {
                let tail: String = key
                    .chars()
                    .rev()
                    .take(8)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("******{}", tail)
            }
            _ => "not set".to_string(),
        }
    }
}

/// Load configuration from `path` (when present) and the process environment.
///
/// When `required` is false and the file does not exist, built-in defaults
/// are used. An explicitly requested file that is missing is an error.
pub fn load_config(path: &Path, required: bool) -> Result<Config> {
    let config = if path.exists() || required {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    let config = apply_env(config, |name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

/// Overlay environment values onto a parsed configuration.
///
/// `lookup` abstracts the environment so tests don't mutate process state.
pub fn apply_env(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    config.provider.api_key = lookup(config.provider.api_key_env.as_str());
    if let Some(url) = lookup("OPENROUTER_BASE_URL").filter(|v| !v.trim().is_empty()) {
        config.provider.base_url = url;
    }
    if let Some(model) = lookup("OPENROUTER_MODEL").filter(|v| !v.trim().is_empty()) {
        config.provider.model = model;
    }
    if let Some(origins) = lookup("EXPLAINER_ALLOWED_ORIGINS") {
        let parsed: Vec<String> = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.cors.allowed_origins = parsed;
        }
    }
    if let Some(flag) = lookup("EXPLAINER_DEV_MODE") {
        config.server.dev_mode = matches!(flag.trim(), "1" | "true" | "TRUE" | "yes");
    }
    config
}

/// Check invariants that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.limits.min_text_len == 0 {
        anyhow::bail!("limits.min_text_len must be >= 1");
    }
    if config.limits.max_text_len < config.limits.min_text_len {
        anyhow::bail!("limits.max_text_len must be >= limits.min_text_len");
    }

    if config.dispatch.attempt_timeout_ms == 0 {
        anyhow::bail!("dispatch.attempt_timeout_ms must be > 0");
    }
    if config.dispatch.overall_timeout_ms == Some(0) {
        anyhow::bail!("dispatch.overall_timeout_ms must be > 0 when set");
    }

    if config.rate_limit.window_secs == 0 {
        anyhow::bail!("rate_limit.window_secs must be > 0");
    }
    if config.rate_limit.max_requests == 0 {
        anyhow::bail!("rate_limit.max_requests must be >= 1");
    }
    if config.rate_limit.capacity == 0 {
        anyhow::bail!("rate_limit.capacity must be >= 1");
    }

    if config.provider.model.trim().is_empty() {
        anyhow::bail!("provider.model must not be empty");
    }
    if config.provider.base_url.trim().is_empty() {
        anyhow::bail!("provider.base_url must not be empty");
    }
    if let Some(t) = config.provider.temperature {
        if !(0.0..=2.0).contains(&t) {
            anyhow::bail!("provider.temperature must be in [0.0, 2.0]");
        }
    }
    if !config.provider.prompt_template.contains("{text}") {
        anyhow::bail!("provider.prompt_template must contain a {{text}} placeholder");
    }

    if config.server.max_body_bytes == 0 {
        anyhow::bail!("server.max_body_bytes must be > 0");
    }

    Ok(())
}
