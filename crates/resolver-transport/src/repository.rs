//! Remote repository descriptors supplied by the resolver

use sha2::{Digest, Sha256};
use std::fmt;

/// Username/password pair for a repository or proxy.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Stable identity used in cache keys. The password only contributes
    /// through its SHA-256 digest.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.password.as_bytes());
        format!("{}:{}", self.username, hex::encode(digest))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// HTTP proxy in front of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyDescriptor {
    /// Proxy URL, e.g. `http://proxy.internal:3128`
    pub url: String,
    pub credentials: Option<Credentials>,
}

impl ProxyDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Proxy URL plus credential fingerprint, for cache keys.
    pub fn identity(&self) -> String {
        match &self.credentials {
            Some(credentials) => format!("{}|{}", self.url, credentials.fingerprint()),
            None => self.url.clone(),
        }
    }
}

/// Remote repository the transporter is bound to. Immutable for the lifetime
/// of a [`TransportSession`](crate::TransportSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub id: String,
    pub url: String,
    /// Transport protocol, normally the URL scheme.
    pub protocol: String,
    pub credentials: Option<Credentials>,
    pub proxy: Option<ProxyDescriptor>,
}

impl RepositoryDescriptor {
    /// Create a descriptor whose protocol is taken from the URL scheme.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let protocol = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            id: id.into(),
            url,
            protocol,
            credentials: None,
            proxy: None,
        }
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyDescriptor) -> Self {
        self.proxy = Some(proxy);
        self
    }
}
