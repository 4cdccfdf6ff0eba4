//! Short-lived cache of the last processed document.
//!
//! Follow-up questions are answered from the cached chunk summaries
//! instead of re-chunking. Expiry is checked lazily on every access:
//! an entry older than the TTL behaves as absent and is dropped.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::ProcessedDocument;
use crate::error::PipelineError;
use crate::pipeline::{ProgressSink, SynthesisEngine};

#[derive(Debug)]
struct Entry {
    document: ProcessedDocument,
    created: Instant,
}

/// Holds the most recent processed document for a fixed time.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entry: Mutex<Option<Entry>>,
}

impl ResultCache {
    /// Creates an empty cache with the given retention.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Retention window.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn live(&self) -> MutexGuard<'_, Option<Entry>> {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = entry.as_ref()
            && current.created.elapsed() >= self.ttl
        {
            debug!(document = %current.document.document_id, "cached document expired");
            *entry = None;
        }
        entry
    }

    /// Stores `document`, replacing any previous entry.
    ///
    /// A document without a single successful summary clears the cache
    /// instead, so it is never offered for follow-ups.
    pub fn store(&self, document: ProcessedDocument) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        if document.succeeded_count() == 0 {
            debug!(document = %document.document_id, "nothing to cache, clearing");
            *entry = None;
            return;
        }
        info!(
            document = %document.document_id,
            summaries = document.succeeded_count(),
            ttl = ?self.ttl,
            "cached processed document"
        );
        *entry = Some(Entry {
            document,
            created: Instant::now(),
        });
    }

    /// Returns true if an unexpired document is cached.
    pub fn has_data(&self) -> bool {
        self.live().is_some()
    }

    /// Returns a copy of the cached document, if unexpired.
    pub fn get(&self) -> Option<ProcessedDocument> {
        self.live().as_ref().map(|e| e.document.clone())
    }

    /// Identity of the cached document, if unexpired.
    pub fn document_id(&self) -> Option<String> {
        self.live().as_ref().map(|e| e.document.document_id.clone())
    }

    /// Time left before the cached document expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.live()
            .as_ref()
            .map(|e| self.ttl.saturating_sub(e.created.elapsed()))
    }

    /// Drops the cached document.
    pub fn clear(&self) {
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Answers `question` from the cached summaries.
    ///
    /// # Errors
    ///
    /// [`PipelineError::CacheExpired`] when nothing is cached, then any
    /// synthesis error.
    pub async fn answer(
        &self,
        question: &str,
        synthesis: &SynthesisEngine,
        progress: &dyn ProgressSink,
    ) -> Result<String, PipelineError> {
        let document = self.get().ok_or(PipelineError::CacheExpired)?;
        debug!(document = %document.document_id, "answering follow-up from cache");
        synthesis.synthesize(&document, question, progress).await
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::pipeline::DEFAULT_CACHE_TTL_SECS))
    }
}
