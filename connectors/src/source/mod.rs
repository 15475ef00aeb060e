pub mod directory;
pub mod dropbox;

use crate::fetch::ContentFetcher;
use crate::model::Document;
use async_trait::async_trait;
use connector_core::Result;
use futures::Stream;
use std::pin::Pin;

pub use directory::DirectorySource;
pub use dropbox::DropboxSource;

/// Lazy, finite stream of documents with their optional deferred downloads.
///
/// A listing failure ends the stream with `Err`; the stream is not
/// restartable, callers start a fresh one per pass.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<(Document, Option<ContentFetcher>)>> + Send>>;

/// A content source the sync pipeline can enumerate.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short service identifier used in logs and metrics.
    fn service_type(&self) -> &'static str;

    /// Verifies the configured location against the backing service.
    async fn validate(&self) -> Result<()>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Enumerates all documents. Nothing is listed until the stream is
    /// polled, and at most one page is held in memory at a time.
    fn fetch_documents(&self) -> DocumentStream;
}
