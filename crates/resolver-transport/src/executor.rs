//! Single-request execution with a one-shot protocol fallback
//!
//! Every logical request goes out at most twice: once over the client picked
//! by the [`ClientSelector`], and once more over HTTP/1.1 when that first
//! attempt used the fast protocol and either ran out of time waiting for a
//! response or had the protocol rejected by the server. Status failures,
//! refused connections and fallback failures are terminal.

use bytes::Bytes;
use futures::stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, Response};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::auth::AuthenticationContext;
use crate::cache::RepositoryState;
use crate::error::{Result, TransportError};
use crate::task::{PutSource, TransportListener};
use crate::transport::{ClientHandle, ClientKind, ClientSelector};

/// Custom header carrying the server-issued user token, in both directions.
pub const USER_TOKEN_HEADER: &str = "http.user-token";

/// Upload chunk size for file sources.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Request body that can be opened again for a retry.
pub struct RequestBody {
    source: PutSource,
    length: Option<u64>,
    listener: Arc<dyn TransportListener>,
    cancelled: Arc<AtomicBool>,
}

impl RequestBody {
    pub fn new(
        source: PutSource,
        length: Option<u64>,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        Self {
            source,
            length,
            listener,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Whether the listener aborted a previous send.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fresh body stream plus its length. File handles live inside the
    /// stream and are closed when reqwest drops it, whatever the outcome.
    pub async fn open(&self) -> io::Result<(reqwest::Body, Option<u64>)> {
        let listener = Arc::clone(&self.listener);
        let cancelled = Arc::clone(&self.cancelled);
        let report = move |chunk: &[u8]| {
            listener.transport_progressed(chunk).map_err(|_| {
                cancelled.store(true, Ordering::Release);
                io::Error::other("transfer cancelled")
            })
        };

        match &self.source {
            PutSource::Bytes(data) => {
                let data = data.clone();
                let length = self.length.or(Some(data.len() as u64));
                let body = stream::once(async move {
                    report(&data)?;
                    Ok::<_, io::Error>(data)
                });
                Ok((reqwest::Body::wrap_stream(body), length))
            }
            PutSource::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let length = match self.length {
                    Some(length) => Some(length),
                    None => Some(file.metadata().await?.len()),
                };
                let body = stream::try_unfold(file, move |mut file| {
                    let report = report.clone();
                    async move {
                        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
                        let n = file.read(&mut buf).await?;
                        if n == 0 {
                            return Ok(None);
                        }
                        buf.truncate(n);
                        report(&buf)?;
                        Ok::<_, io::Error>(Some((Bytes::from(buf), file)))
                    }
                });
                Ok((reqwest::Body::wrap_stream(body), length))
            }
        }
    }
}

/// Sends requests for one repository.
#[derive(Debug)]
pub struct RequestExecutor {
    base: Url,
    selector: Arc<ClientSelector>,
    state: RepositoryState,
    auth: Arc<AuthenticationContext>,
    remember_fallback: bool,
}

impl RequestExecutor {
    /// `base` must end with a `/`.
    pub fn new(
        base: Url,
        selector: Arc<ClientSelector>,
        state: RepositoryState,
        auth: Arc<AuthenticationContext>,
        remember_fallback: bool,
    ) -> Self {
        Self {
            base,
            selector,
            state,
            auth,
            remember_fallback,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn state(&self) -> &RepositoryState {
        &self.state
    }

    /// Absolute URL for a location relative to the repository base.
    pub fn resolve(&self, location: &str) -> Result<Url> {
        let invalid = |reason: &str| TransportError::InvalidLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        if location.starts_with("//") || Url::parse(location).is_ok() {
            return Err(invalid("absolute locations are not accepted"));
        }
        let url = self
            .base
            .join(location)
            .map_err(|e| invalid(&e.to_string()))?;
        if !url.as_str().starts_with(self.base.as_str()) {
            return Err(invalid("resolves outside the repository"));
        }
        Ok(url)
    }

    /// Send one logical request and return the successful response with its
    /// body still unread.
    pub async fn execute(
        &self,
        method: Method,
        location: &str,
        headers: HeaderMap,
        body: Option<&RequestBody>,
    ) -> Result<Response> {
        let url = self.resolve(location)?;
        let handle = self.initial_client(url.host_str().unwrap_or_default())?;

        match self.attempt(&handle, &method, &url, &headers, body).await {
            Err(e) if handle.kind() == ClientKind::Fast && e.triggers_fallback() => {
                tracing::warn!(
                    "{} request to {} failed ({}), retrying over {}",
                    ClientKind::Fast,
                    url,
                    e,
                    ClientKind::Fallback
                );
                self.state.set_fast_protocol_viable(false);
                let fallback = self.selector.fallback()?;
                self.attempt(&fallback, &method, &url, &headers, body).await
            }
            other => other,
        }
    }

    fn initial_client(&self, host: &str) -> Result<Arc<ClientHandle>> {
        if self.remember_fallback && self.state.fast_protocol_viable() == Some(false) {
            tracing::debug!("{} previously failed for {}, using fallback", ClientKind::Fast, host);
            return self.selector.fallback();
        }
        self.selector.select(host)
    }

    async fn attempt(
        &self,
        handle: &ClientHandle,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&RequestBody>,
    ) -> Result<Response> {
        let mut request = handle
            .client_for(url)
            .request(method.clone(), url.clone())
            .headers(headers.clone());

        if let Some(token) = self.state.user_token() {
            request = request.header(USER_TOKEN_HEADER, token);
        }
        if let Some(credentials) = self.auth.credentials() {
            request = request.basic_auth(credentials.username, Some(credentials.password));
        }
        if let Some(body) = body {
            let (stream, length) = body.open().await?;
            request = request.header(CONTENT_TYPE, "application/octet-stream");
            if let Some(length) = length {
                request = request.header(CONTENT_LENGTH, length);
            }
            request = request.body(stream);
        }

        let sent = match handle.response_deadline() {
            Some(deadline) => tokio::time::timeout(deadline, request.send())
                .await
                .map_err(|_| TransportError::Timeout {
                    kind: handle.kind(),
                    timeout_ms: duration_ms(deadline),
                    url: url.to_string(),
                })?,
            None => request.send().await,
        };
        let response = match sent {
            Ok(response) => response,
            Err(_) if body.is_some_and(RequestBody::is_cancelled) => {
                return Err(TransportError::Cancelled);
            }
            Err(e) => return Err(map_reqwest_error(handle, url, e)),
        };

        let status = response.status();
        tracing::debug!(
            "Request over {:?} done, method={}, resp status={}, url={}",
            response.version(),
            method,
            status.as_u16(),
            url
        );

        if status.as_u16() >= 300 {
            return Err(TransportError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        if let Some(token) = response
            .headers()
            .get(USER_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
        {
            tracing::trace!("Storing user token for {}", self.base);
            self.state.set_user_token(token);
        }

        Ok(response)
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The one place reqwest failures become transport errors.
pub(crate) fn map_reqwest_error(
    handle: &ClientHandle,
    url: &Url,
    error: reqwest::Error,
) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            kind: handle.kind(),
            timeout_ms: duration_ms(handle.connect_timeout()),
            url: url.to_string(),
        }
    } else if handle.kind() == ClientKind::Fast && is_connection_rejected(&error) {
        TransportError::ProtocolUnavailable {
            kind: handle.kind(),
            url: url.to_string(),
            source: error,
        }
    } else if error.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            source: error,
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            source: error,
        }
    }
}

/// Whether the HTTP/2 connection as a whole failed, as opposed to a single
/// stream being reset.
fn is_connection_rejected(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(h2) = err.downcast_ref::<h2::Error>() {
            return h2.is_go_away() || h2.is_io();
        }
        source = err.source();
    }
    false
}
