//! Checksum recovery from response headers

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Algorithm name (e.g. `SHA-1`) to hex digest.
pub type Checksums = BTreeMap<String, String>;

/// Reads response metadata and may recover the content checksum without a
/// second download.
pub trait ChecksumExtractor: Send + Sync {
    fn extract(&self, headers: &HeaderMap) -> Option<Checksums>;
}

impl<F> ChecksumExtractor for F
where
    F: Fn(&HeaderMap) -> Option<Checksums> + Send + Sync,
{
    fn extract(&self, headers: &HeaderMap) -> Option<Checksums> {
        self(headers)
    }
}

/// Ordered chain of extractors. The first non-empty result wins; results are
/// never merged.
#[derive(Clone, Default)]
pub struct ChecksumChain {
    extractors: Vec<Arc<dyn ChecksumExtractor>>,
}

impl ChecksumChain {
    /// Chain with no extractors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extractor. Earlier extractors are consulted first.
    #[must_use]
    pub fn with<E>(mut self, extractor: E) -> Self
    where
        E: ChecksumExtractor + 'static,
    {
        self.extractors.push(Arc::new(extractor));
        self
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Run the chain. An empty map means no extractor recognised the headers.
    pub fn extract(&self, headers: &HeaderMap) -> Checksums {
        self.extractors
            .iter()
            .find_map(|extractor| extractor.extract(headers).filter(|found| !found.is_empty()))
            .unwrap_or_default()
    }
}

impl fmt::Debug for ChecksumChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumChain")
            .field("extractors", &self.extractors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed(pairs: &[(&str, &str)]) -> Checksums {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_first_non_empty_wins() {
        let third_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&third_calls);

        let chain = ChecksumChain::new()
            .with(|_: &HeaderMap| Some(Checksums::new()))
            .with(|_: &HeaderMap| Some(fixed(&[("SHA-256", "abc123")])))
            .with(move |_: &HeaderMap| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(fixed(&[("SHA-1", "ffff")]))
            });

        let result = chain.extract(&HeaderMap::new());
        assert_eq!(result, fixed(&[("SHA-256", "abc123")]));
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nothing_found_is_empty() {
        let chain = ChecksumChain::new()
            .with(|_: &HeaderMap| None)
            .with(|_: &HeaderMap| Some(Checksums::new()));
        assert!(chain.extract(&HeaderMap::new()).is_empty());
        assert!(ChecksumChain::new().extract(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn test_extractor_reads_headers() {
        let chain = ChecksumChain::new().with(|headers: &HeaderMap| {
            let sha1 = headers.get("x-checksum-sha1")?.to_str().ok()?;
            Some(fixed(&[("SHA-1", sha1)]))
        });

        let mut headers = HeaderMap::new();
        assert!(chain.extract(&headers).is_empty());

        headers.insert("x-checksum-sha1", HeaderValue::from_static("0a1b2c"));
        assert_eq!(chain.extract(&headers), fixed(&[("SHA-1", "0a1b2c")]));
        assert_eq!(chain.len(), 1);
    }
}
