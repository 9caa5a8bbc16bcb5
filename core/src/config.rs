//! Explicit client configuration.
//!
//! The transport timeout is a per-client value rather than shared process
//! state, so two clients in one process can be configured independently.

use std::time::Duration;

use crate::error::ApiError;

/// Timeout applied by the default transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_BASE_URL: &str = "APICLIENT_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "APICLIENT_TIMEOUT_SECS";
pub const ENV_USER_AGENT: &str = "APICLIENT_USER_AGENT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Load from `APICLIENT_BASE_URL`, `APICLIENT_TIMEOUT_SECS` and
    /// `APICLIENT_USER_AGENT`.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let base_url = lookup(ENV_BASE_URL)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ApiError::InvalidConfig(format!("{ENV_BASE_URL} is not set")))?;

        let mut config = Self::new(base_url);
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|e| {
                ApiError::InvalidConfig(format!("{ENV_TIMEOUT_SECS}={raw:?}: {e}"))
            })?;
            if secs == 0 {
                return Err(ApiError::InvalidConfig(format!(
                    "{ENV_TIMEOUT_SECS} must be greater than zero"
                )));
            }
            config.timeout = Duration::from_secs(secs);
        }
        config.user_agent = lookup(ENV_USER_AGENT).filter(|value| !value.is_empty());
        Ok(config)
    }
}
