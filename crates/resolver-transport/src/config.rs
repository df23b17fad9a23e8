//! Configuration resolved from the resolver session

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::context::RepositorySession;
use crate::error::{Result, TransportError};

/// Connect timeout in milliseconds. Also the deadline for receiving a response.
/// `0` waits indefinitely.
pub const CONNECT_TIMEOUT: &str = "aether.connector.connectTimeout";
/// Overall request timeout in milliseconds. `0` disables it.
pub const REQUEST_TIMEOUT: &str = "aether.connector.requestTimeout";
/// `default` or `insecure`.
pub const HTTPS_SECURITY_MODE: &str = "aether.connector.https.securityMode";
/// User-Agent header sent with every request.
pub const USER_AGENT: &str = "aether.connector.userAgent";
/// Whether tokens and negotiation flags are cached across transporters.
pub const CACHE_STATE: &str = "aether.connector.http.cacheState";
/// Comma separated hosts that are always served over HTTP/1.1.
pub const FALLBACK_HOSTS: &str = "aether.connector.http.fallbackHosts";
/// Route a destination straight to HTTP/1.1 once its fast attempt timed out.
pub const REMEMBER_FALLBACK: &str = "aether.connector.http.rememberFallback";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1_800_000;

/// Aggregator hosts that are unreliable over the multiplexed transport.
pub const DEFAULT_FALLBACK_HOSTS: &[&str] = &[
    "repo.maven.apache.org",
    "repo1.maven.org",
    "central.sonatype.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Validate server certificates.
    #[default]
    Default,
    /// Accept any server certificate.
    Insecure,
}

impl SecurityMode {
    /// Parse a configuration value, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "insecure" => Some(Self::Insecure),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Insecure => write!(f, "insecure"),
        }
    }
}

/// Settings for one repository, resolved from session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connection timeout and response deadline, zero when unbounded
    pub connect_timeout: Duration,

    /// Ceiling for a whole request including the body, zero when unbounded
    pub request_timeout: Duration,

    pub security_mode: SecurityMode,

    pub user_agent: String,

    /// Hosts forced onto the fallback protocol, lowercase
    pub fallback_hosts: BTreeSet<String>,

    pub remember_fallback: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            security_mode: SecurityMode::Default,
            user_agent: default_user_agent(),
            fallback_hosts: DEFAULT_FALLBACK_HOSTS
                .iter()
                .map(|host| (*host).to_string())
                .collect(),
            remember_fallback: false,
        }
    }
}

fn default_user_agent() -> String {
    format!("resolver-transport/{}", env!("CARGO_PKG_VERSION"))
}

impl TransportConfig {
    /// Resolve configuration for one repository. A `<key>.<repository id>`
    /// entry takes precedence over the plain key.
    pub fn from_session(session: &RepositorySession, repository_id: &str) -> Result<Self> {
        let scoped = |key: &str| format!("{key}.{repository_id}");
        let defaults = Self::default();

        let connect_key = scoped(CONNECT_TIMEOUT);
        let request_key = scoped(REQUEST_TIMEOUT);
        let security_key = scoped(HTTPS_SECURITY_MODE);
        let agent_key = scoped(USER_AGENT);
        let hosts_key = scoped(FALLBACK_HOSTS);
        let remember_key = scoped(REMEMBER_FALLBACK);

        let mode = session.get_string("default", &[&security_key, HTTPS_SECURITY_MODE]);
        let security_mode =
            SecurityMode::parse(&mode).ok_or_else(|| TransportError::InvalidConfig {
                key: HTTPS_SECURITY_MODE.to_string(),
                value: mode.clone(),
            })?;

        let fallback_hosts = match session
            .config_value(&hosts_key)
            .or_else(|| session.config_value(FALLBACK_HOSTS))
        {
            Some(list) => parse_host_list(list),
            None => defaults.fallback_hosts,
        };

        Ok(Self {
            connect_timeout: Duration::from_millis(
                session.get_u64(DEFAULT_CONNECT_TIMEOUT_MS, &[&connect_key, CONNECT_TIMEOUT]),
            ),
            request_timeout: Duration::from_millis(
                session.get_u64(DEFAULT_REQUEST_TIMEOUT_MS, &[&request_key, REQUEST_TIMEOUT]),
            ),
            security_mode,
            user_agent: session.get_string(&defaults.user_agent, &[&agent_key, USER_AGENT]),
            fallback_hosts,
            remember_fallback: session.get_bool(false, &[&remember_key, REMEMBER_FALLBACK]),
        })
    }
}

fn parse_host_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(|host| host.trim().to_ascii_lowercase())
        .filter(|host| !host.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::from_session(&RepositorySession::new(), "central")
            .expect("Operation should succeed");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(1800));
        assert_eq!(config.security_mode, SecurityMode::Default);
        assert!(config.fallback_hosts.contains("repo.maven.apache.org"));
        assert!(config.user_agent.starts_with("resolver-transport/"));
        assert!(!config.remember_fallback);
    }

    #[test]
    fn test_repository_scoped_override() {
        let session = RepositorySession::new()
            .with_config(CONNECT_TIMEOUT, "2000")
            .with_config(format!("{CONNECT_TIMEOUT}.central"), "500")
            .with_config(HTTPS_SECURITY_MODE, "insecure");

        let central = TransportConfig::from_session(&session, "central").unwrap();
        assert_eq!(central.connect_timeout, Duration::from_millis(500));
        assert_eq!(central.security_mode, SecurityMode::Insecure);

        let other = TransportConfig::from_session(&session, "snapshots").unwrap();
        assert_eq!(other.connect_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_unknown_security_mode_rejected() {
        let session = RepositorySession::new().with_config(HTTPS_SECURITY_MODE, "trust-me");
        let err = TransportConfig::from_session(&session, "central")
            .expect_err("Test operation should fail");
        assert!(matches!(err, TransportError::InvalidConfig { .. }));
    }

    #[test]
    fn test_fallback_hosts_replace_defaults() {
        let session = RepositorySession::new()
            .with_config(FALLBACK_HOSTS, " Mirror.Example.com , ,127.0.0.1");
        let config = TransportConfig::from_session(&session, "central").unwrap();

        let expected: BTreeSet<String> = ["127.0.0.1", "mirror.example.com"]
            .iter()
            .map(|h| (*h).to_string())
            .collect();
        assert_eq!(config.fallback_hosts, expected);
    }

    #[test]
    fn test_zero_timeouts_are_kept_as_unbounded() {
        let session = RepositorySession::new()
            .with_config(CONNECT_TIMEOUT, "0")
            .with_config(REQUEST_TIMEOUT, "0");
        let config = TransportConfig::from_session(&session, "central").unwrap();
        assert!(config.connect_timeout.is_zero());
        assert!(config.request_timeout.is_zero());
    }

    #[test]
    fn test_security_mode_display_roundtrip() {
        for mode in [SecurityMode::Default, SecurityMode::Insecure] {
            assert_eq!(SecurityMode::parse(&mode.to_string()), Some(mode));
        }
    }
}
