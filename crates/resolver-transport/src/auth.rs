//! Authentication contexts owned by a transport session

use parking_lot::RwLock;
use std::fmt;

use crate::repository::{Credentials, RepositoryDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    Repository,
    Proxy,
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repository => write!(f, "repository"),
            Self::Proxy => write!(f, "proxy"),
        }
    }
}

/// Credentials for one scope, released when the owning session closes.
#[derive(Debug)]
pub struct AuthenticationContext {
    scope: AuthScope,
    credentials: RwLock<Option<Credentials>>,
}

impl AuthenticationContext {
    fn new(scope: AuthScope, credentials: Option<Credentials>) -> Self {
        Self {
            scope,
            credentials: RwLock::new(credentials),
        }
    }

    /// Repository credentials. User info embedded in the repository URL takes
    /// precedence over the descriptor's credentials.
    pub fn for_repository(
        repository: &RepositoryDescriptor,
        url_user_info: Option<Credentials>,
    ) -> Self {
        Self::new(
            AuthScope::Repository,
            url_user_info.or_else(|| repository.credentials.clone()),
        )
    }

    /// Context for the repository's proxy, if it carries credentials.
    pub fn for_proxy(repository: &RepositoryDescriptor) -> Self {
        Self::new(
            AuthScope::Proxy,
            repository
                .proxy
                .as_ref()
                .and_then(|proxy| proxy.credentials.clone()),
        )
    }

    pub fn scope(&self) -> AuthScope {
        self.scope
    }

    /// Credentials still held, `None` after [`close`](Self::close).
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    /// Drop the held credentials. Safe to call more than once.
    pub fn close(&self) {
        if self.credentials.write().take().is_some() {
            tracing::debug!("Released {} authentication context", self.scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ProxyDescriptor;

    #[test]
    fn test_user_info_takes_precedence() {
        let repo = RepositoryDescriptor::new("central", "https://repo.example.com")
            .with_credentials(Credentials::new("descriptor", "a"));

        let ctx = AuthenticationContext::for_repository(&repo, Some(Credentials::new("url", "b")));
        assert_eq!(ctx.credentials().map(|c| c.username).as_deref(), Some("url"));

        let ctx = AuthenticationContext::for_repository(&repo, None);
        assert_eq!(
            ctx.credentials().map(|c| c.username).as_deref(),
            Some("descriptor")
        );
    }

    #[test]
    fn test_proxy_context_and_close() {
        let repo = RepositoryDescriptor::new("central", "https://repo.example.com").with_proxy(
            ProxyDescriptor::new("http://proxy:3128").with_credentials(Credentials::new("p", "q")),
        );

        let ctx = AuthenticationContext::for_proxy(&repo);
        assert_eq!(ctx.scope(), AuthScope::Proxy);
        assert!(ctx.credentials().is_some());

        ctx.close();
        ctx.close();
        assert!(ctx.credentials().is_none());
    }
}
