//! # resolver-transport - Adaptive HTTP Transport for Artifact Repositories
//!
//! This crate fetches, probes and uploads artifacts on remote package
//! repositories for a dependency resolver. Requests go out over multiplexed
//! HTTP/2 by default and drop to HTTP/1.1 when the fast protocol is known to
//! misbehave for a host or fails to answer in time.
//!
//! ## Architecture Overview
//!
//! ```text
//! TransportSession ──► TransferCoordinator ──► RequestExecutor ──► ClientSelector
//!   (per repository)     (PEEK / GET / PUT)      (one request,        (HTTP/2 or
//!                                                 one fallback)        HTTP/1.1)
//!                              │                        │
//!                              ▼                        ▼
//!                        ChecksumChain              StateCache
//!                     (digests from headers)   (tokens, protocol flags)
//! ```
//!
//! ## Features
//!
//! - **Protocol Selection**: hosts listed in the fallback routing table always
//!   use HTTP/1.1; everything else starts on HTTP/2
//! - **Protocol Fallback**: a fast-protocol request that gets no response within
//!   the connect timeout, or whose HTTP/2 connection is rejected, is retried
//!   exactly once over HTTP/1.1
//! - **Token Caching**: server-issued `http.user-token` values are echoed on
//!   later requests, shared across sessions through a [`RepositoryCache`]
//! - **Atomic Downloads**: file downloads land in a co-located temporary file
//!   and are renamed into place, so a failed transfer never corrupts the
//!   destination
//! - **Resumable Downloads**: partial files continue with a `Range` request
//! - **Checksums From Headers**: a [`ChecksumChain`] recovers digests from
//!   response metadata
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use resolver_transport::{
//!     ChecksumChain, GetTask, RepositoryDescriptor, RepositorySession, TransportSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = RepositorySession::new();
//!     let repository = RepositoryDescriptor::new("central", "https://repo.example.com/maven2/");
//!     let transport = TransportSession::new(&session, repository, ChecksumChain::new())?;
//!
//!     let mut task = GetTask::new("org/example/lib/1.0/lib-1.0.pom")
//!         .with_destination("target/lib-1.0.pom");
//!     transport.get(&mut task).await?;
//!
//!     transport.close()?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod context;
pub mod error;
pub(crate) mod executor;
pub mod repository;
pub mod task;
pub(crate) mod transfer;
pub mod transport;
pub mod transporter;
pub mod uri;

// Re-export main types
pub use cache::{CachedToken, CompoundKey, RepositoryState, StateCache};
pub use checksum::{ChecksumChain, ChecksumExtractor, Checksums};
pub use config::{SecurityMode, TransportConfig};
pub use context::{RepositoryCache, RepositorySession};
pub use error::{ErrorKind, Result, TransportError};
pub use executor::USER_TOKEN_HEADER;
pub use repository::{Credentials, ProxyDescriptor, RepositoryDescriptor};
pub use task::{GetTask, PeekTask, PutSource, PutTask, TransferCancelled, TransportListener};
pub use transporter::TransportSession;
pub use uri::directories_between;

// Re-export client plumbing for custom protocol factories
pub use transport::{ClientFactory, ClientKind, ClientSettings, ProtocolRegistry};
