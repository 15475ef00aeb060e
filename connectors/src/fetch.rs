use crate::gate::{FetchDecision, FetchGate};
use crate::model::{Attachment, ContentLocator, ContentRef};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use connector_core::Result;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Source-specific byte access for deferred downloads.
#[async_trait]
pub trait ContentReader: Send + Sync {
    async fn read(&self, locator: &ContentLocator) -> Result<Bytes>;
}

/// Deferred download bound to a single enumerated entry.
///
/// Holds everything by value, so invoking it is independent of any listing
/// or pagination state that has since moved on.
pub struct ContentFetcher {
    reference: ContentRef,
    gate: FetchGate,
    reader: Arc<dyn ContentReader>,
}

impl fmt::Debug for ContentFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFetcher")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

impl ContentFetcher {
    pub fn new(reference: ContentRef, gate: FetchGate, reader: Arc<dyn ContentReader>) -> Self {
        Self {
            reference,
            gate,
            reader,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.reference.id
    }

    /// Downloads and base64-encodes the entry's bytes.
    ///
    /// Returns `Ok(None)` when the gate filters the entry out; a skipped
    /// download is an expected outcome, not an error.
    pub async fn fetch(&self, doit: bool) -> Result<Option<Attachment>> {
        match self.gate.evaluate(&self.reference, doit) {
            FetchDecision::Skip(reason) => {
                debug!(
                    id = %self.reference.id,
                    name = %self.reference.name,
                    %reason,
                    "Skipping content download"
                );
                Ok(None)
            }
            FetchDecision::Fetch => {
                let payload = self.reader.read(&self.reference.locator).await?;
                debug!(
                    id = %self.reference.id,
                    name = %self.reference.name,
                    bytes = payload.len(),
                    "Downloaded content"
                );
                Ok(Some(Attachment {
                    id: self.reference.id.clone(),
                    timestamp: self.reference.timestamp,
                    content: BASE64.encode(&payload),
                }))
            }
        }
    }
}
