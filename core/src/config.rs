//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_TIMEOUT_SECS: &str = "CMIS_TIMEOUT_SECS";
const ENV_USER_AGENT: &str = "CMIS_USER_AGENT";

/// How document content is attached to a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentUpload {
    /// Multipart when the root collection accepts `multipart/related`,
    /// base64 otherwise.
    #[default]
    Auto,
    /// Always embed a `cmisra:content` element with base64 data.
    Base64,
    /// Always send a `multipart/related` body.
    Multipart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deadline for each individual HTTP exchange.
    pub timeout: Duration,
    pub user_agent: String,
    pub content_upload: ContentUpload,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("cmis-core/{}", env!("CARGO_PKG_VERSION")),
            content_upload: ContentUpload::Auto,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `CMIS_TIMEOUT_SECS` and `CMIS_USER_AGENT`.
    /// Unset, blank or unparseable values keep the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = lookup(ENV_USER_AGENT)
            .map(|raw| raw.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            config.user_agent = agent;
        }
        config
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_content_upload(mut self, content_upload: ContentUpload) -> Self {
        self.content_upload = content_upload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_overrides_defaults() {
        let config = SessionConfig::from_lookup(|name| match name {
            ENV_TIMEOUT_SECS => Some(" 5 ".to_string()),
            ENV_USER_AGENT => Some("demo/1.0".to_string()),
            _ => None,
        });
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "demo/1.0");
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = SessionConfig::from_lookup(|name| match name {
            ENV_TIMEOUT_SECS => Some("soon".to_string()),
            ENV_USER_AGENT => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = SessionConfig::from_lookup(|name| {
            (name == ENV_TIMEOUT_SECS).then(|| "0".to_string())
        });
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }
}
