use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config_env::{
    EnvSource, optional_trimmed_env, parse_optional_u64_env, parse_u32_env, parse_u64_env,
    process_env,
};

pub const DEFAULT_USER_ID: &str = "default-user";
const DEFAULT_SESSION_LIST_LIMIT: u32 = 50;
const DEFAULT_ACTIVITY_LIMIT: u32 = 20;
const DEFAULT_MOCK_START_LATENCY_MS: u64 = 300;
const DEFAULT_MOCK_STEP_LATENCY_MS: u64 = 1_500;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    // None selects the mock backend.
    pub backend_url: Option<Url>,
    pub ws_url: Option<Url>,
    pub user_id: String,
    pub session_list_limit: u32,
    pub activity_limit: u32,
    pub request_timeout_ms: Option<u64>,
    pub mock_start_latency_ms: u64,
    pub mock_step_latency_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid url in env var {key}: {message}")]
    InvalidUrl { key: String, message: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            ws_url: None,
            user_id: DEFAULT_USER_ID.to_string(),
            session_list_limit: DEFAULT_SESSION_LIST_LIMIT,
            activity_limit: DEFAULT_ACTIVITY_LIMIT,
            request_timeout_ms: None,
            mock_start_latency_ms: DEFAULT_MOCK_START_LATENCY_MS,
            mock_step_latency_ms: DEFAULT_MOCK_STEP_LATENCY_MS,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_source(&process_env)
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_source(&|key: &str| values.get(key).cloned())
    }

    fn from_source(source: EnvSource<'_>) -> Result<Self, ConfigError> {
        let backend_url = parse_url_env(source, "VCTT_BACKEND_URL", &["http", "https"])?;
        let ws_url = match parse_url_env(source, "VCTT_WS_URL", &["ws", "wss"])? {
            Some(url) => Some(url),
            None => backend_url.as_ref().and_then(derive_ws_url),
        };

        let config = Self {
            backend_url,
            ws_url,
            user_id: optional_trimmed_env(source, "VCTT_USER_ID")
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            session_list_limit: parse_u32_env(
                source,
                "VCTT_SESSION_LIST_LIMIT",
                DEFAULT_SESSION_LIST_LIMIT,
            )?,
            activity_limit: parse_u32_env(source, "VCTT_ACTIVITY_LIMIT", DEFAULT_ACTIVITY_LIMIT)?,
            request_timeout_ms: parse_optional_u64_env(source, "VCTT_REQUEST_TIMEOUT_MS")?,
            mock_start_latency_ms: parse_u64_env(
                source,
                "VCTT_MOCK_START_LATENCY_MS",
                DEFAULT_MOCK_START_LATENCY_MS,
            )?,
            mock_step_latency_ms: parse_u64_env(
                source,
                "VCTT_MOCK_STEP_LATENCY_MS",
                DEFAULT_MOCK_STEP_LATENCY_MS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_list_limit == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "VCTT_SESSION_LIST_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.activity_limit == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "VCTT_ACTIVITY_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidConfiguration(
                "VCTT_REQUEST_TIMEOUT_MS must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn uses_mock_backend(&self) -> bool {
        self.backend_url.is_none()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn mock_start_latency(&self) -> Duration {
        Duration::from_millis(self.mock_start_latency_ms)
    }

    pub fn mock_step_latency(&self) -> Duration {
        Duration::from_millis(self.mock_step_latency_ms)
    }
}

fn parse_url_env(
    source: EnvSource<'_>,
    key: &str,
    allowed_schemes: &[&str],
) -> Result<Option<Url>, ConfigError> {
    let Some(raw) = optional_trimmed_env(source, key) else {
        return Ok(None);
    };

    let url = Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl {
        key: key.to_string(),
        message: err.to_string(),
    })?;
    if !allowed_schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            message: format!(
                "scheme must be one of {}; got '{}'",
                allowed_schemes.join(", "),
                url.scheme()
            ),
        });
    }

    Ok(Some(url))
}

fn derive_ws_url(backend_url: &Url) -> Option<Url> {
    let scheme = match backend_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return None,
    };
    let mut ws_url = backend_url.clone();
    ws_url.set_scheme(scheme).ok()?;
    Some(ws_url)
}
