//! Per-request choice between the fast and fallback clients

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ClientHandle, ClientKind, ClientSettings, ProtocolRegistry};
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

/// Hosts that must always be reached over the fallback protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    fallback_hosts: BTreeSet<String>,
}

impl RoutingTable {
    /// Table routing `hosts` to the fallback protocol.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fallback_hosts: hosts
                .into_iter()
                .map(|host| host.as_ref().trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    /// Table built from the configured fallback hosts.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(&config.fallback_hosts)
    }

    /// Protocol to use for `host`. Matching is exact and case-insensitive.
    pub fn route(&self, host: &str) -> ClientKind {
        if self.fallback_hosts.contains(&host.to_ascii_lowercase()) {
            ClientKind::Fallback
        } else {
            ClientKind::Fast
        }
    }
}

type Slot = Mutex<Option<Arc<ClientHandle>>>;

/// Lazily builds and hands out the two clients of one session.
///
/// Each client is built at most once; concurrent first calls for the same
/// protocol serialize on that protocol's slot only.
#[derive(Debug)]
pub struct ClientSelector {
    registry: ProtocolRegistry,
    settings: ClientSettings,
    routing: RoutingTable,
    fast: Slot,
    fallback: Slot,
    closed: AtomicBool,
}

impl ClientSelector {
    /// Selector with no clients built yet.
    pub fn new(registry: ProtocolRegistry, settings: ClientSettings, routing: RoutingTable) -> Self {
        Self {
            registry,
            settings,
            routing,
            fast: Mutex::new(None),
            fallback: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Host routing used by [`select`](Self::select).
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Client for a request to `host`.
    pub fn select(&self, host: &str) -> Result<Arc<ClientHandle>> {
        self.client(self.routing.route(host))
    }

    /// The HTTP/1.1 client, used for the single retry after a fast timeout.
    pub fn fallback(&self) -> Result<Arc<ClientHandle>> {
        self.client(ClientKind::Fallback)
    }

    /// The client for `kind`, built and started on first use.
    pub fn client(&self, kind: ClientKind) -> Result<Arc<ClientHandle>> {
        let mut slot = self.slot(kind).lock();
        // Checked under the slot lock so close() cannot miss a fresh client.
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        tracing::debug!("Creating {} client", kind);
        let handle = Arc::new(self.registry.build(kind, &self.settings)?);
        handle.start()?;
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Whether the client for `kind` has been built.
    pub fn is_created(&self, kind: ClientKind) -> bool {
        self.slot(kind).lock().is_some()
    }

    /// Stop every client that was created and empty the slots. Later calls
    /// find nothing to stop. Returns the failures encountered.
    pub fn close(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for kind in [ClientKind::Fast, ClientKind::Fallback] {
            let mut slot = self.slot(kind).lock();
            self.closed.store(true, Ordering::Release);
            if let Some(handle) = slot.take()
                && let Err(e) = handle.stop()
            {
                failures.push(e);
            }
        }
        failures
    }

    fn slot(&self, kind: ClientKind) -> &Slot {
        match kind {
            ClientKind::Fast => &self.fast,
            ClientKind::Fallback => &self.fallback,
        }
    }
}
