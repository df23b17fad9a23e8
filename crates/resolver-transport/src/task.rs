//! Transfer tasks handed to a [`TransportSession`](crate::TransportSession)

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::checksum::Checksums;

/// Returned by a listener to abort the running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCancelled;

/// Progress callbacks. Both default to doing nothing.
pub trait TransportListener: Send + Sync {
    /// Called once before the first body byte. `length` is `None` when the
    /// remote side did not declare one.
    fn transport_started(
        &self,
        _offset: u64,
        _length: Option<u64>,
    ) -> Result<(), TransferCancelled> {
        Ok(())
    }

    fn transport_progressed(&self, _chunk: &[u8]) -> Result<(), TransferCancelled> {
        Ok(())
    }
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl TransportListener for NoopListener {}

fn noop() -> Arc<dyn TransportListener> {
    Arc::new(NoopListener)
}

/// Existence check for a remote resource.
#[derive(Clone)]
pub struct PeekTask {
    pub location: String,
    pub listener: Arc<dyn TransportListener>,
}

impl PeekTask {
    /// Existence check for `location`, relative to the repository base.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            listener: noop(),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TransportListener>) -> Self {
        self.listener = listener;
        self
    }
}

/// Download of a remote resource, either to a file or into memory.
pub struct GetTask {
    pub location: String,
    /// Target file. `None` buffers the body in [`GetTask::data`].
    pub destination: Option<PathBuf>,
    /// Continue a partial download already present at the destination.
    pub resume: bool,
    pub listener: Arc<dyn TransportListener>,
    /// Filled from response headers once the body has been consumed.
    pub checksums: Checksums,
    data: Bytes,
}

impl GetTask {
    /// Download `location` into memory unless a destination is set.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            destination: None,
            resume: false,
            listener: noop(),
            checksums: Checksums::new(),
            data: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TransportListener>) -> Self {
        self.listener = listener;
        self
    }

    /// File the download lands in, if any.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Body of an in-memory download. Empty for file downloads.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub(crate) fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }
}

/// Where an upload reads its content from.
#[derive(Debug, Clone)]
pub enum PutSource {
    Bytes(Bytes),
    /// Streamed from disk; the file is reopened for every attempt.
    File(PathBuf),
}

/// Upload to a remote location.
pub struct PutTask {
    pub location: String,
    pub source: PutSource,
    /// Declared content length, sent as `Content-Length` when known.
    pub length: Option<u64>,
    pub listener: Arc<dyn TransportListener>,
}

impl PutTask {
    /// Upload an in-memory payload.
    pub fn from_bytes(location: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            location: location.into(),
            length: Some(data.len() as u64),
            source: PutSource::Bytes(data),
            listener: noop(),
        }
    }

    /// Upload from a file. The length is read from the file metadata at send
    /// time unless set with [`PutTask::with_length`].
    pub fn from_file(location: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            source: PutSource::File(path.into()),
            length: None,
            listener: noop(),
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TransportListener>) -> Self {
        self.listener = listener;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_task_defaults() {
        let task = GetTask::new("org/example/a.jar");
        assert!(task.destination().is_none());
        assert!(!task.resume);
        assert!(task.checksums.is_empty());
        assert!(task.data().is_empty());

        let task = task.with_destination("/tmp/a.jar").with_resume(true);
        assert_eq!(task.destination(), Some(Path::new("/tmp/a.jar")));
        assert!(task.resume);
    }

    #[test]
    fn test_put_length() {
        let task = PutTask::from_bytes("a.pom", &b"<project/>"[..]);
        assert_eq!(task.length, Some(10));

        let task = PutTask::from_file("a.jar", "/tmp/a.jar");
        assert_eq!(task.length, None);
        assert_eq!(task.with_length(42).length, Some(42));
    }

    #[test]
    fn test_noop_listener_never_cancels() {
        let listener = NoopListener;
        assert!(listener.transport_started(0, Some(10)).is_ok());
        assert!(listener.transport_progressed(b"abc").is_ok());
    }
}
