//! Session-wide transport state shared across transporter incarnations
//!
//! Servers may hand out a short-lived user token that lets later requests
//! skip renegotiation. Tokens, together with per-destination protocol
//! negotiation flags, live in a [`StateCache`] owned by the caller's
//! [`RepositoryCache`](crate::RepositoryCache) so they outlive any single
//! [`TransportSession`](crate::TransportSession).
//!
//! ```text
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │ TransportSession (repo A)│     │ TransportSession (repo B)│
//! │   RepositoryState ───────┼──┐  │   RepositoryState ───────┼──┐
//! └──────────────────────────┘  │  └──────────────────────────┘  │
//!                               ▼                                ▼
//!                   ┌────────────────────────────────────────┐
//!                   │ StateCache (DashMap per concern)       │
//!                   └────────────────────────────────────────┘
//! ```

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::CACHE_STATE;
use crate::context::RepositorySession;
use crate::repository::RepositoryDescriptor;

/// Ordered tuple of identity fields. Compared by value only.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CompoundKey {
    parts: Vec<Option<String>>,
}

impl CompoundKey {
    /// Key from its parts, in order. `None` is a distinct value.
    pub fn new<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        Self {
            parts: parts.into_iter().collect(),
        }
    }

    /// Key scoping user tokens: repository id, URL, credentials and proxy.
    pub fn user_token(repository: &RepositoryDescriptor) -> Self {
        Self::new([
            Some(repository.id.clone()),
            Some(repository.url.clone()),
            repository
                .credentials
                .as_ref()
                .map(crate::repository::Credentials::fingerprint),
            repository
                .proxy
                .as_ref()
                .map(crate::repository::ProxyDescriptor::identity),
        ])
    }

    /// Key scoping negotiation flags: the destination as seen through a proxy.
    pub fn destination(repository: &RepositoryDescriptor) -> Self {
        Self::new([
            Some(repository.url.clone()),
            repository
                .proxy
                .as_ref()
                .map(crate::repository::ProxyDescriptor::identity),
        ])
    }
}

impl fmt::Debug for CompoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.parts.iter().map(|part| part.as_deref().unwrap_or("null")))
            .finish()
    }
}

/// A server-issued user token and when it was last stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub last_updated: SystemTime,
}

/// Thread-safe store of user tokens and negotiation flags.
#[derive(Debug, Default)]
pub struct StateCache {
    user_tokens: DashMap<CompoundKey, CachedToken>,
    fast_protocol: DashMap<CompoundKey, bool>,
}

impl StateCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Shared cache for `session`, created on first use.
    ///
    /// Returns `None` when the session carries no cache or caching is turned
    /// off through configuration.
    pub fn for_session(session: &RepositorySession) -> Option<Arc<Self>> {
        let cache = session.cache()?;
        if !session.get_bool(true, &[CACHE_STATE]) {
            tracing::debug!("Transport state caching disabled by {}", CACHE_STATE);
            return None;
        }
        Some(cache.state_cache())
    }

    /// Token stored for `key`, if any.
    pub fn user_token(&self, key: &CompoundKey) -> Option<CachedToken> {
        self.user_tokens.get(key).map(|entry| entry.value().clone())
    }

    /// Store or overwrite the token for `key`. Last writer wins.
    pub fn set_user_token(&self, key: CompoundKey, value: impl Into<String>) {
        self.user_tokens.insert(
            key,
            CachedToken {
                value: value.into(),
                last_updated: SystemTime::now(),
            },
        );
    }

    /// Recorded fast-protocol outcome for a destination. `None` until one
    /// has been observed.
    pub fn fast_protocol_viable(&self, key: &CompoundKey) -> Option<bool> {
        self.fast_protocol.get(key).map(|entry| *entry.value())
    }

    /// Record the fast-protocol outcome for a destination.
    pub fn set_fast_protocol_viable(&self, key: CompoundKey, viable: bool) {
        self.fast_protocol.insert(key, viable);
    }

    /// Number of stored tokens.
    pub fn token_count(&self) -> usize {
        self.user_tokens.len()
    }
}

/// One transport session's view of the shared [`StateCache`].
///
/// Without a backing cache every read is empty and every write is dropped.
#[derive(Debug, Clone)]
pub struct RepositoryState {
    global: Option<Arc<StateCache>>,
    token_key: CompoundKey,
    destination_key: CompoundKey,
}

impl RepositoryState {
    /// View keyed by `repository`'s identity, backed by `global` if present.
    pub fn new(global: Option<Arc<StateCache>>, repository: &RepositoryDescriptor) -> Self {
        Self {
            global,
            token_key: CompoundKey::user_token(repository),
            destination_key: CompoundKey::destination(repository),
        }
    }

    /// Whether a shared cache backs this view.
    pub fn is_cached(&self) -> bool {
        self.global.is_some()
    }

    /// Token to echo on the next request.
    pub fn user_token(&self) -> Option<String> {
        self.global
            .as_ref()?
            .user_token(&self.token_key)
            .map(|token| token.value)
    }

    /// Remember a token from a successful response.
    pub fn set_user_token(&self, value: &str) {
        if let Some(global) = &self.global {
            global.set_user_token(self.token_key.clone(), value);
        }
    }

    /// Recorded fast-protocol outcome for this destination.
    pub fn fast_protocol_viable(&self) -> Option<bool> {
        self.global
            .as_ref()?
            .fast_protocol_viable(&self.destination_key)
    }

    /// Record the fast-protocol outcome for this destination.
    pub fn set_fast_protocol_viable(&self, viable: bool) {
        if let Some(global) = &self.global {
            global.set_fast_protocol_viable(self.destination_key.clone(), viable);
        }
    }
}
