//! Top-level transporter bound to one remote repository

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

use crate::auth::AuthenticationContext;
use crate::cache::{RepositoryState, StateCache};
use crate::checksum::ChecksumChain;
use crate::config::TransportConfig;
use crate::context::RepositorySession;
use crate::error::{ErrorKind, Result, TransportError};
use crate::executor::RequestExecutor;
use crate::repository::{Credentials, RepositoryDescriptor};
use crate::task::{GetTask, PeekTask, PutTask};
use crate::transfer::TransferCoordinator;
use crate::transport::{ClientSelector, ClientSettings, ProtocolRegistry, RoutingTable};

/// Transport for one repository.
///
/// Owns the base URL, both authentication contexts and the lazily created
/// clients. Safe to share across tasks; `peek`, `get` and `put` may run
/// concurrently. Once [`close`](Self::close) has run every operation fails
/// with [`TransportError::Closed`].
#[derive(Debug)]
pub struct TransportSession {
    repository: RepositoryDescriptor,
    config: TransportConfig,
    executor: Arc<RequestExecutor>,
    coordinator: TransferCoordinator,
    selector: Arc<ClientSelector>,
    repository_auth: Arc<AuthenticationContext>,
    proxy_auth: Arc<AuthenticationContext>,
    closed: AtomicBool,
}

impl TransportSession {
    pub fn new(
        session: &RepositorySession,
        repository: RepositoryDescriptor,
        checksums: ChecksumChain,
    ) -> Result<Self> {
        Self::with_registry(session, repository, checksums, ProtocolRegistry::standard())
    }

    /// Build a session whose clients come from `registry`. Both protocols
    /// must be registered.
    pub fn with_registry(
        session: &RepositorySession,
        repository: RepositoryDescriptor,
        checksums: ChecksumChain,
        registry: ProtocolRegistry,
    ) -> Result<Self> {
        if !matches!(repository.protocol.as_str(), "http" | "https") {
            return Err(TransportError::UnsupportedProtocol {
                protocol: repository.protocol.clone(),
            });
        }
        registry.validate()?;

        let (base, user_info) = base_url(&repository.url)?;
        let config = TransportConfig::from_session(session, &repository.id)?;

        let repository_auth = Arc::new(AuthenticationContext::for_repository(
            &repository,
            user_info,
        ));
        let proxy_auth = Arc::new(AuthenticationContext::for_proxy(&repository));
        let proxy = build_proxy(&repository, &proxy_auth)?;

        let selector = Arc::new(ClientSelector::new(
            registry,
            ClientSettings::from_config(&config, proxy),
            RoutingTable::from_config(&config),
        ));
        let state = RepositoryState::new(StateCache::for_session(session), &repository);
        let executor = Arc::new(RequestExecutor::new(
            base,
            Arc::clone(&selector),
            state,
            Arc::clone(&repository_auth),
            config.remember_fallback,
        ));
        let coordinator = TransferCoordinator::new(Arc::clone(&executor), checksums);

        tracing::debug!(
            "Transport for {} at {} ready (connect timeout {:?}, security mode {})",
            repository.id,
            executor.base(),
            config.connect_timeout,
            config.security_mode
        );

        Ok(Self {
            repository,
            config,
            executor,
            coordinator,
            selector,
            repository_auth,
            proxy_auth,
            closed: AtomicBool::new(false),
        })
    }

    /// Repository this session talks to.
    pub fn repository(&self) -> &RepositoryDescriptor {
        &self.repository
    }

    /// Configuration resolved for the repository.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Base URL without user info, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        self.executor.base()
    }

    /// Cached tokens and protocol flags for the repository.
    pub fn state(&self) -> &RepositoryState {
        self.executor.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check that a resource exists without downloading it.
    pub async fn peek(&self, task: &PeekTask) -> Result<()> {
        self.ensure_open()?;
        self.coordinator.peek(task).await
    }

    /// Download a resource into the task's destination or into memory.
    pub async fn get(&self, task: &mut GetTask) -> Result<()> {
        self.ensure_open()?;
        self.coordinator.get(task).await
    }

    /// Upload the task's body to its location.
    pub async fn put(&self, task: &PutTask) -> Result<()> {
        self.ensure_open()?;
        self.coordinator.put(task).await
    }

    /// Retry classification for a failure returned by this session.
    pub fn classify(&self, error: &TransportError) -> ErrorKind {
        error.kind()
    }

    /// Stop the clients and release credentials. Every step runs even when
    /// an earlier one fails; a second call does nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let failures = self.selector.close();
        self.repository_auth.close();
        self.proxy_auth.close();
        tracing::debug!("Closed transport for {}", self.repository.id);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Close { failures })
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

/// Parse the repository URL into a base ending in `/` with any user info
/// removed, plus the decoded user info.
fn base_url(raw: &str) -> Result<(Url, Option<Credentials>)> {
    let invalid = |reason: String| TransportError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("not a hierarchical URL".to_string()));
    }

    let user_info = if url.username().is_empty() {
        None
    } else {
        let username = urlencoding::decode(url.username()).map_err(|e| invalid(e.to_string()))?;
        let password = urlencoding::decode(url.password().unwrap_or_default())
            .map_err(|e| invalid(e.to_string()))?;
        Some(Credentials::new(username, password))
    };

    url.set_username("")
        .and_then(|()| url.set_password(None))
        .map_err(|()| invalid("cannot strip user info".to_string()))?;
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok((url, user_info))
}

fn build_proxy(
    repository: &RepositoryDescriptor,
    auth: &AuthenticationContext,
) -> Result<Option<reqwest::Proxy>> {
    let Some(descriptor) = &repository.proxy else {
        return Ok(None);
    };

    let mut proxy = reqwest::Proxy::all(&descriptor.url).map_err(|e| {
        TransportError::InvalidConfig {
            key: "proxy".to_string(),
            value: format!("{} ({e})", descriptor.url),
        }
    })?;
    if let Some(credentials) = auth.credentials() {
        proxy = proxy.basic_auth(&credentials.username, &credentials.password);
    }
    Ok(Some(proxy))
}
