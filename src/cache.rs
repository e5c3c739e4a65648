//! Conversion cache controller.
//!
//! [`ConversionCache::resolve`] turns one [`Document`] into markdown:
//!
//! 1. Fingerprint the document with the configured [`FingerprintScheme`].
//! 2. With `use_cache`, look the fingerprint up. A hit returns the stored
//!    markdown without touching the converter. A store read failure is
//!    logged and treated as a miss.
//! 3. Otherwise run the converter under `conversion.timeout_secs`. If it
//!    fails, times out, or yields only whitespace, the raw bytes are decoded
//!    as UTF-8 as a last resort.
//! 4. With `use_cache`, write the result back (plain-text fallbacks
//!    included). A store write failure is logged as an error and the fresh
//!    markdown is still returned.
//!
//! # Single-flight
//!
//! When enabled, concurrent cache-using resolves of one fingerprint share a
//! single conversion. The conversion runs on its own task so it completes
//! (and populates the cache) even if every waiting request goes away.
//! Requests with `use_cache = false` always convert independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use docmark_core::capability::Converter;
use docmark_core::error::{ConversionError, ConverterError};
use docmark_core::models::{Resolution, ResolutionSource};
use docmark_core::store::ConversionStore;
use docmark_core::{Document, Fingerprint, FingerprintScheme};

type InFlight = Shared<BoxFuture<'static, Result<Resolution, ConversionError>>>;

/// Cache-aware document resolver. Cheap to clone.
#[derive(Clone)]
pub struct ConversionCache {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ConversionStore>,
    converter: Arc<dyn Converter>,
    scheme: FingerprintScheme,
    timeout: Duration,
    single_flight: bool,
    in_flight: Mutex<HashMap<Fingerprint, InFlight>>,
}

impl ConversionCache {
    pub fn new(
        store: Arc<dyn ConversionStore>,
        converter: Arc<dyn Converter>,
        scheme: FingerprintScheme,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                converter,
                scheme,
                timeout,
                single_flight: true,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enables or disables coalescing of concurrent conversions.
    ///
    /// Returns a cache with its own in-flight table; clones taken earlier
    /// keep their previous setting.
    pub fn with_single_flight(self, enabled: bool) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(Inner {
                store: Arc::clone(&inner.store),
                converter: Arc::clone(&inner.converter),
                scheme: inner.scheme,
                timeout: inner.timeout,
                single_flight: enabled,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn single_flight(&self) -> bool {
        self.inner.single_flight
    }

    pub fn scheme(&self) -> FingerprintScheme {
        self.inner.scheme
    }

    pub fn fingerprint(&self, doc: &Document) -> Fingerprint {
        self.inner.scheme.fingerprint_document(doc)
    }

    /// Number of conversions currently shared between requests.
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolves a document to markdown. See the module docs for the steps.
    pub async fn resolve(
        &self,
        doc: &Document,
        use_cache: bool,
    ) -> Result<Resolution, ConversionError> {
        let fingerprint = self.fingerprint(doc);
        if !(use_cache && self.inner.single_flight) {
            return self.inner.resolve_with(fingerprint, doc, use_cache).await;
        }
        self.shared_resolution(fingerprint, doc).await
    }

    fn shared_resolution(&self, fingerprint: Fingerprint, doc: &Document) -> InFlight {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = in_flight.get(&fingerprint) {
            debug!(fingerprint = %fingerprint.short(), "joining in-flight conversion");
            return existing.clone();
        }

        let inner = Arc::clone(&self.inner);
        let doc = doc.clone();
        let key = fingerprint.clone();
        let task = tokio::spawn(async move {
            let result = inner.resolve_with(key.clone(), &doc, true).await;
            inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            result
        });

        let shared = async move {
            task.await.unwrap_or_else(|e| {
                Err(ConversionError::Failed {
                    converter: ConverterError::External(format!("conversion task failed: {}", e)),
                    fallback: "not attempted".to_string(),
                })
            })
        }
        .boxed()
        .shared();
        in_flight.insert(fingerprint, shared.clone());
        shared
    }
}

impl Inner {
    async fn resolve_with(
        &self,
        fingerprint: Fingerprint,
        doc: &Document,
        use_cache: bool,
    ) -> Result<Resolution, ConversionError> {
        if use_cache {
            match self.store.get(&fingerprint).await {
                Ok(Some(record)) => {
                    debug!(fingerprint = %fingerprint.short(), name = %doc.name, "cache hit");
                    return Ok(Resolution {
                        fingerprint,
                        markdown: record.markdown,
                        source: ResolutionSource::Cache,
                    });
                }
                Ok(None) => debug!(fingerprint = %fingerprint.short(), name = %doc.name, "cache miss"),
                Err(e) => warn!(name = %doc.name, "cache read failed, converting instead: {}", e),
            }
        }

        let (markdown, source) = match self.convert(doc).await {
            Ok(markdown) => (markdown, ResolutionSource::Converted),
            Err(converter_err) => {
                warn!(
                    name = %doc.name,
                    converter = self.converter.name(),
                    "conversion failed: {}",
                    converter_err
                );
                match plain_text(&doc.content) {
                    Ok(text) => {
                        info!(name = %doc.name, "using plain-text fallback");
                        (text, ResolutionSource::PlainText)
                    }
                    Err(fallback) => {
                        return Err(ConversionError::Failed {
                            converter: converter_err,
                            fallback,
                        })
                    }
                }
            }
        };

        if use_cache {
            if let Err(e) = self
                .store
                .upsert(&fingerprint, &doc.name, &doc.content_type, &markdown)
                .await
            {
                error!(
                    fingerprint = %fingerprint.short(),
                    name = %doc.name,
                    "failed to cache conversion: {}",
                    e
                );
            }
        }

        Ok(Resolution {
            fingerprint,
            markdown,
            source,
        })
    }

    async fn convert(&self, doc: &Document) -> Result<String, ConverterError> {
        match tokio::time::timeout(self.timeout, self.converter.convert(doc)).await {
            Ok(Ok(markdown)) if markdown.trim().is_empty() => Err(ConverterError::EmptyOutput),
            Ok(result) => result,
            Err(_) => Err(ConverterError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Decodes raw bytes as UTF-8 text. Empty or whitespace-only text counts as
/// a failure.
pub fn plain_text(bytes: &[u8]) -> Result<String, String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| format!("content is not valid UTF-8: {}", e))?;
    if text.trim().is_empty() {
        return Err("content is empty".to_string());
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docmark_core::store::memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Converter for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn convert(&self, doc: &Document) -> Result<String, ConverterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(String::from_utf8_lossy(&doc.content).to_uppercase())
        }
    }

    fn cache(converter: Arc<Upper>) -> (ConversionCache, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let cache = ConversionCache::new(
            store.clone(),
            converter,
            FingerprintScheme::default(),
            Duration::from_secs(5),
        );
        (cache, store)
    }

    #[test]
    fn plain_text_rules() {
        assert_eq!(plain_text(b"hello").unwrap(), "hello");
        assert!(plain_text(b" \n ").is_err());
        assert!(plain_text(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[tokio::test]
    async fn second_resolve_is_a_hit() {
        let converter = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        let (cache, store) = cache(converter.clone());
        let doc = Document::new(b"abc".to_vec(), "a.txt", "text/plain");

        let first = cache.resolve(&doc, true).await.unwrap();
        assert_eq!(first.source, ResolutionSource::Converted);
        let second = cache.resolve(&doc, true).await.unwrap();
        assert_eq!(second.source, ResolutionSource::Cache);
        assert_eq!(second.markdown, "ABC");
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn bypass_never_reads_or_writes() {
        let converter = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        let (cache, store) = cache(converter.clone());
        let doc = Document::new(b"abc".to_vec(), "a.txt", "text/plain");

        cache.resolve(&doc, false).await.unwrap();
        cache.resolve(&doc, false).await.unwrap();
        assert_eq!(converter.calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn single_flight_disabled_still_caches() {
        let converter = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        let (cache, store) = cache(converter.clone());
        let earlier = cache.clone();
        let cache = cache.with_single_flight(false);
        assert!(!cache.single_flight());
        assert!(earlier.single_flight());
        let doc = Document::new(b"abc".to_vec(), "a.txt", "text/plain");

        cache.resolve(&doc, true).await.unwrap();
        let hit = cache.resolve(&doc, true).await.unwrap();
        assert_eq!(hit.source, ResolutionSource::Cache);
        assert_eq!(store.len(), 1);
    }
}
