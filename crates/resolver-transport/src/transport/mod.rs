//! HTTP client construction for the two transport protocols
//!
//! Two client flavours serve every request:
//! - **Fast**: multiplexed HTTP/2, used by default. Cleartext requests use
//!   prior knowledge; `https` requests offer `h2` and `http/1.1` through ALPN
//! - **Fallback**: conventional HTTP/1.1, used for hosts known to misbehave
//!   over the fast protocol and for the single retry after a fast timeout
//!
//! Clients are built through a [`ProtocolRegistry`] that is populated
//! deterministically before any session is created. A session refuses to
//! start when either protocol has no registered factory.

mod selector;

pub use selector::{ClientSelector, RoutingTable};

use reqwest::{Client, ClientBuilder, redirect};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use url::Url;

use crate::config::{SecurityMode, TransportConfig};
use crate::error::{Result, TransportError};

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 8;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring provider for rustls once per process.
pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Another component may already have installed a provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// The two protocols a session can send a request over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Multiplexed fast protocol
    Fast,
    /// HTTP/1.1
    Fallback,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "HTTP/2"),
            Self::Fallback => write!(f, "HTTP/1.1"),
        }
    }
}

/// Session-wide settings applied to every client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Connect timeout and response deadline. Zero means unbounded.
    pub connect_timeout: Duration,
    /// Whole-request ceiling. Zero means unbounded.
    pub request_timeout: Duration,
    pub security_mode: SecurityMode,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub proxy: Option<reqwest::Proxy>,
}

impl ClientSettings {
    /// Settings taken from a resolved repository configuration.
    pub fn from_config(config: &TransportConfig, proxy: Option<reqwest::Proxy>) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            security_mode: config.security_mode,
            user_agent: config.user_agent.clone(),
            follow_redirects: true,
            proxy,
        }
    }

    /// Builder with the settings shared by both protocols.
    pub fn builder(&self) -> ClientBuilder {
        ensure_crypto_provider();

        let mut builder = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .user_agent(self.user_agent.clone());

        if !self.connect_timeout.is_zero() {
            builder = builder.connect_timeout(self.connect_timeout);
        }
        if !self.request_timeout.is_zero() {
            builder = builder.timeout(self.request_timeout);
        }

        builder = if self.follow_redirects {
            builder.redirect(redirect::Policy::limited(MAX_REDIRECTS))
        } else {
            builder.redirect(redirect::Policy::none())
        };

        if self.security_mode == SecurityMode::Insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        match &self.proxy {
            Some(proxy) => builder.proxy(proxy.clone()),
            None => builder.no_proxy(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default(), None)
    }
}

/// Builds the underlying client for one protocol.
pub trait ClientFactory: Send + Sync {
    /// Client for every request, or only cleartext ones when
    /// [`build_tls`](Self::build_tls) returns a client.
    fn build(&self, settings: &ClientSettings) -> std::result::Result<Client, reqwest::Error>;

    /// Separate client for `https` requests.
    fn build_tls(
        &self,
        _settings: &ClientSettings,
    ) -> Option<std::result::Result<Client, reqwest::Error>> {
        None
    }
}

impl<F> ClientFactory for F
where
    F: Fn(&ClientSettings) -> std::result::Result<Client, reqwest::Error> + Send + Sync,
{
    fn build(&self, settings: &ClientSettings) -> std::result::Result<Client, reqwest::Error> {
        self(settings)
    }
}

/// HTTP/2 with one multiplexed connection per host. Cleartext connections
/// skip the upgrade round trip with prior knowledge. TLS connections let
/// ALPN settle on `h2` or `http/1.1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiplexedFactory;

impl ClientFactory for MultiplexedFactory {
    fn build(&self, settings: &ClientSettings) -> std::result::Result<Client, reqwest::Error> {
        settings
            .builder()
            .http2_prior_knowledge()
            .http2_adaptive_window(true)
            .build()
    }

    fn build_tls(
        &self,
        settings: &ClientSettings,
    ) -> Option<std::result::Result<Client, reqwest::Error>> {
        Some(settings.builder().http2_adaptive_window(true).build())
    }
}

/// Plain HTTP/1.1 with a small keep-alive pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Factory;

impl ClientFactory for Http1Factory {
    fn build(&self, settings: &ClientSettings) -> std::result::Result<Client, reqwest::Error> {
        settings
            .builder()
            .http1_only()
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
    }
}

/// Factories by protocol.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    factories: HashMap<ClientKind, Arc<dyn ClientFactory>>,
}

impl ProtocolRegistry {
    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in factory for both protocols.
    pub fn standard() -> Self {
        Self::empty()
            .register(ClientKind::Fast, MultiplexedFactory)
            .register(ClientKind::Fallback, Http1Factory)
    }

    /// Register `factory` for `kind`, replacing any earlier one.
    #[must_use]
    pub fn register<F>(mut self, kind: ClientKind, factory: F) -> Self
    where
        F: ClientFactory + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    /// Whether a factory is registered for `kind`.
    pub fn contains(&self, kind: ClientKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Fail unless both protocols can be built.
    pub fn validate(&self) -> Result<()> {
        for kind in [ClientKind::Fast, ClientKind::Fallback] {
            if !self.contains(kind) {
                return Err(TransportError::MissingClientFactory(kind));
            }
        }
        Ok(())
    }

    pub(crate) fn build(&self, kind: ClientKind, settings: &ClientSettings) -> Result<ClientHandle> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(TransportError::MissingClientFactory(kind))?;
        let setup = |source| TransportError::ClientSetup { kind, source };
        let client = factory.build(settings).map_err(setup)?;
        let tls_client = factory.build_tls(settings).transpose().map_err(setup)?;
        Ok(ClientHandle::new(kind, client, tls_client, settings))
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("ProtocolRegistry")
            .field("registered", &kinds)
            .finish()
    }
}

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// A built client plus its lifecycle. Started once, stopped once.
#[derive(Debug)]
pub struct ClientHandle {
    kind: ClientKind,
    client: Client,
    tls_client: Option<Client>,
    follow_redirects: bool,
    connect_timeout: Duration,
    lifecycle: AtomicU8,
}

impl ClientHandle {
    fn new(
        kind: ClientKind,
        client: Client,
        tls_client: Option<Client>,
        settings: &ClientSettings,
    ) -> Self {
        Self {
            kind,
            client,
            tls_client,
            follow_redirects: settings.follow_redirects,
            connect_timeout: settings.connect_timeout,
            lifecycle: AtomicU8::new(CREATED),
        }
    }

    /// Protocol this handle speaks.
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Client used for cleartext requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Client for a request to `url`.
    pub fn client_for(&self, url: &Url) -> &Client {
        match &self.tls_client {
            Some(client) if url.scheme() == "https" => client,
            _ => &self.client,
        }
    }

    /// Whether redirects are followed, up to [`MAX_REDIRECTS`] hops.
    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Configured connect timeout. Zero means unbounded.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// How long to wait for a response, if bounded.
    pub fn response_deadline(&self) -> Option<Duration> {
        (!self.connect_timeout.is_zero()).then_some(self.connect_timeout)
    }

    /// Whether the handle is started and not yet stopped.
    pub fn is_started(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == STARTED
    }

    /// Move from created to started. A handle that was already started or
    /// stopped cannot serve requests.
    pub(crate) fn start(&self) -> Result<()> {
        self.lifecycle
            .compare_exchange(CREATED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| tracing::debug!("Started {} client", self.kind))
            .map_err(|_| {
                tracing::warn!("{} client cannot be started twice", self.kind);
                TransportError::Closed
            })
    }

    /// Stop the client. Idle pooled connections are released once the last
    /// in-flight request drops its handle.
    pub(crate) fn stop(&self) -> std::result::Result<(), String> {
        match self.lifecycle.swap(STOPPED, Ordering::AcqRel) {
            STOPPED => Err(format!("{} client already stopped", self.kind)),
            _ => {
                tracing::debug!("Stopped {} client", self.kind);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_is_complete() {
        let registry = ProtocolRegistry::standard();
        assert!(registry.validate().is_ok());
        assert!(registry.contains(ClientKind::Fast));
        assert!(registry.contains(ClientKind::Fallback));
    }

    #[test]
    fn test_missing_factory_is_reported() {
        let registry = ProtocolRegistry::empty().register(ClientKind::Fallback, Http1Factory);
        assert!(matches!(
            registry.validate(),
            Err(TransportError::MissingClientFactory(ClientKind::Fast))
        ));
    }

    #[tokio::test]
    async fn test_build_both_protocols() {
        let registry = ProtocolRegistry::standard();
        let settings = ClientSettings::default();

        for kind in [ClientKind::Fast, ClientKind::Fallback] {
            let handle = registry.build(kind, &settings).expect("Operation should succeed");
            assert_eq!(handle.kind(), kind);
            assert!(handle.follows_redirects());
            assert_eq!(handle.connect_timeout(), Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn test_insecure_mode_builds() {
        let settings = ClientSettings {
            security_mode: SecurityMode::Insecure,
            ..ClientSettings::default()
        };
        assert!(MultiplexedFactory.build(&settings).is_ok());
        assert!(Http1Factory.build(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let handle = ProtocolRegistry::standard()
            .build(ClientKind::Fallback, &ClientSettings::default())
            .unwrap();

        assert!(!handle.is_started());
        handle.start().unwrap();
        assert!(handle.is_started());
        assert!(matches!(handle.start(), Err(TransportError::Closed)));

        handle.stop().unwrap();
        assert!(!handle.is_started());
        assert!(handle.stop().is_err());
    }

    #[tokio::test]
    async fn test_stopped_handle_cannot_start() {
        let handle = ProtocolRegistry::standard()
            .build(ClientKind::Fast, &ClientSettings::default())
            .unwrap();

        handle.stop().unwrap();
        assert!(matches!(handle.start(), Err(TransportError::Closed)));
        assert!(!handle.is_started());
    }

    #[tokio::test]
    async fn test_fast_protocol_has_tls_client() {
        let settings = ClientSettings::default();
        let fast = ProtocolRegistry::standard()
            .build(ClientKind::Fast, &settings)
            .unwrap();
        let fallback = ProtocolRegistry::standard()
            .build(ClientKind::Fallback, &settings)
            .unwrap();

        let https = Url::parse("https://repo.example.com/a.jar").unwrap();
        let http = Url::parse("http://repo.example.com/a.jar").unwrap();
        assert!(fast.tls_client.is_some());
        assert!(fallback.tls_client.is_none());
        assert!(std::ptr::eq(fast.client_for(&http), fast.client()));
        assert!(!std::ptr::eq(fast.client_for(&https), fast.client()));
        assert!(std::ptr::eq(fallback.client_for(&https), fallback.client()));
    }

    #[tokio::test]
    async fn test_zero_connect_timeout_is_unbounded() {
        let settings = ClientSettings {
            connect_timeout: Duration::ZERO,
            request_timeout: Duration::ZERO,
            ..ClientSettings::default()
        };
        let handle = ProtocolRegistry::standard()
            .build(ClientKind::Fallback, &settings)
            .unwrap();
        assert_eq!(handle.response_deadline(), None);

        let bounded = ProtocolRegistry::standard()
            .build(ClientKind::Fallback, &ClientSettings::default())
            .unwrap();
        assert_eq!(bounded.response_deadline(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ClientKind::Fast.to_string(), "HTTP/2");
        assert_eq!(ClientKind::Fallback.to_string(), "HTTP/1.1");
    }
}
