//! PEEK, GET and PUT on top of the [`RequestExecutor`]
//!
//! File downloads never touch the destination until the whole body is on
//! disk: bytes go to a hidden temporary file next to the destination, which
//! is then renamed over it. Any failure before the rename deletes the
//! temporary file and leaves the destination as it was.

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue, LAST_MODIFIED, RANGE};
use reqwest::{Method, Response, StatusCode};
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::checksum::ChecksumChain;
use crate::error::{Result, TransportError};
use crate::executor::{RequestBody, RequestExecutor};
use crate::task::{GetTask, PeekTask, PutTask, TransportListener};

#[derive(Debug)]
pub struct TransferCoordinator {
    executor: Arc<RequestExecutor>,
    checksums: ChecksumChain,
}

impl TransferCoordinator {
    pub fn new(executor: Arc<RequestExecutor>, checksums: ChecksumChain) -> Self {
        Self {
            executor,
            checksums,
        }
    }

    /// HEAD request; succeeds when the resource exists.
    pub async fn peek(&self, task: &PeekTask) -> Result<()> {
        let response = self
            .executor
            .execute(Method::HEAD, &task.location, HeaderMap::new(), None)
            .await?;
        tracing::trace!("Peeked {} ({:?} bytes)", response.url(), response.content_length());
        Ok(())
    }

    pub async fn get(&self, task: &mut GetTask) -> Result<()> {
        match task.destination.clone() {
            Some(destination) => self.get_to_file(task, &destination).await,
            None => self.get_to_memory(task).await,
        }
    }

    pub async fn put(&self, task: &PutTask) -> Result<()> {
        let body = RequestBody::new(task.source.clone(), task.length, Arc::clone(&task.listener));
        task.listener.transport_started(0, body.length())?;
        self.executor
            .execute(Method::PUT, &task.location, HeaderMap::new(), Some(&body))
            .await?;
        Ok(())
    }

    async fn get_to_memory(&self, task: &mut GetTask) -> Result<()> {
        let response = self
            .executor
            .execute(Method::GET, &task.location, HeaderMap::new(), None)
            .await?;
        let headers = response.headers().clone();
        task.listener.transport_started(0, response.content_length())?;

        let mut data = BytesMut::new();
        let url = response.url().to_string();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;
            task.listener.transport_progressed(&chunk)?;
            data.extend_from_slice(&chunk);
        }

        task.set_data(data.freeze());
        self.attach_checksums(task, &headers);
        Ok(())
    }

    async fn get_to_file(&self, task: &mut GetTask, destination: &Path) -> Result<()> {
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let (std_file, temp_path) = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(parent)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut offset = 0;
        let mut request_headers = HeaderMap::new();
        if task.resume && existing_length(destination).await > 0 {
            let mut existing = tokio::fs::File::open(destination).await?;
            offset = tokio::io::copy(&mut existing, &mut file).await?;
            let range = HeaderValue::try_from(format!("bytes={offset}-")).map_err(io::Error::other)?;
            request_headers.insert(RANGE, range);
            tracing::debug!("Resuming {} at byte {}", task.location, offset);
        }

        let response = self
            .executor
            .execute(Method::GET, &task.location, request_headers, None)
            .await?;
        let headers = response.headers().clone();

        if offset > 0 {
            if response.status() == StatusCode::PARTIAL_CONTENT {
                let start = content_range_start(&headers)?;
                if start != offset {
                    return Err(TransportError::ContentRange(format!(
                        "expected start {offset}, server sent {start}"
                    )));
                }
            } else {
                tracing::debug!("Range ignored for {}, restarting from zero", task.location);
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                offset = 0;
            }
        }

        let total = response.content_length().map(|length| length + offset);
        task.listener.transport_started(offset, total)?;
        write_body(response, &mut file, task.listener.as_ref()).await?;
        file.flush().await?;
        drop(file);

        temp_path
            .persist(destination)
            .map_err(|e| TransportError::Io(e.error))?;

        if let Some(modified) = last_modified(&headers)
            && let Err(e) = set_modified(destination, modified).await
        {
            tracing::warn!(
                "Failed to set modification time of {}: {}",
                destination.display(),
                e
            );
        }

        self.attach_checksums(task, &headers);
        Ok(())
    }

    fn attach_checksums(&self, task: &mut GetTask, headers: &HeaderMap) {
        let found = self.checksums.extract(headers);
        if !found.is_empty() {
            tracing::trace!("Checksums from response headers: {:?}", found);
            task.checksums = found;
        }
    }
}

async fn existing_length(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => 0,
    }
}

async fn write_body(
    response: Response,
    file: &mut tokio::fs::File,
    listener: &dyn TransportListener,
) -> Result<()> {
    let url = response.url().to_string();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| TransportError::Request {
            url: url.clone(),
            source,
        })?;
        listener.transport_progressed(&chunk)?;
        file.write_all(&chunk).await?;
    }
    Ok(())
}

/// Start offset of a `Content-Range: bytes <start>-<end>/<total>` header.
fn content_range_start(headers: &HeaderMap) -> Result<u64> {
    let value = headers
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| TransportError::ContentRange("header missing".to_string()))?;

    value
        .strip_prefix("bytes ")
        .and_then(|range| range.split_once('-'))
        .and_then(|(start, _)| start.trim().parse().ok())
        .ok_or_else(|| TransportError::ContentRange(value.to_string()))
}

/// `Last-Modified` as an instant. Unparseable values are logged and ignored.
fn last_modified(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(LAST_MODIFIED)?.to_str().ok()?;
    match chrono::DateTime::parse_from_rfc2822(value) {
        Ok(parsed) => Some(SystemTime::from(parsed)),
        Err(e) => {
            tracing::warn!("Ignoring unparseable Last-Modified {:?}: {}", value, e);
            None
        }
    }
}

async fn set_modified(path: &Path, modified: SystemTime) -> io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.into_std().await.set_modified(modified)
}
