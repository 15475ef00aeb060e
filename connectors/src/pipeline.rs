use crate::model::Attachment;
use crate::sink::DocumentSink;
use crate::source::DataSource;
use connector_core::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Counters for one completed sync pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub documents: u64,
    pub attachments: u64,
    pub skipped: u64,
    pub failed_downloads: u64,
}

type DownloadOutcome = (String, Result<Option<Attachment>>, Duration);

/// Drives one enumeration pass: documents are written as they arrive, and
/// admitted content downloads run concurrently up to a fixed bound.
pub struct SyncPipeline {
    source: Arc<dyn DataSource>,
    concurrent_downloads: usize,
}

impl SyncPipeline {
    pub fn new(source: Arc<dyn DataSource>, concurrent_downloads: usize) -> Self {
        Self {
            source,
            concurrent_downloads: concurrent_downloads.max(1),
        }
    }

    /// Runs the pass to completion. A listing failure aborts with `Err`;
    /// a failed download only costs that entry its content.
    #[instrument(skip(self, sink))]
    pub async fn run(&self, sink: &mut DocumentSink, fetch_content: bool) -> Result<SyncReport> {
        let service = self.source.service_type();
        let started = Instant::now();
        let mut last_progress = Instant::now();
        let mut report = SyncReport::default();

        info!(service, fetch_content, "🚀 Starting sync pass");

        let mut stream = self.source.fetch_documents();
        let mut downloads: FuturesUnordered<_> = FuturesUnordered::new();

        loop {
            tokio::select! {
                item = stream.next() => {
                    let Some(item) = item else { break };
                    let (document, fetcher) = item?;
                    sink.write_document(&document).await?;
                    report.documents += 1;
                    counter!("connector_documents_emitted", "service" => service).increment(1);

                    if let Some(fetcher) = fetcher {
                        if downloads.len() >= self.concurrent_downloads {
                            if let Some(outcome) = downloads.next().await {
                                record_download(outcome, sink, &mut report, service).await?;
                            }
                        }
                        let id = fetcher.document_id().to_string();
                        downloads.push(async move {
                            let fetch_started = Instant::now();
                            let result = fetcher.fetch(fetch_content).await;
                            (id, result, fetch_started.elapsed())
                        });
                    }
                }
                // Keeps in-flight downloads moving while the next page is
                // still on the wire.
                Some(outcome) = downloads.next(), if !downloads.is_empty() => {
                    record_download(outcome, sink, &mut report, service).await?;
                }
            }

            if last_progress.elapsed() > Duration::from_secs(5) {
                info!(
                    "📊 Progress: {} documents | {} attachments | {} skipped | {} in flight",
                    report.documents,
                    report.attachments,
                    report.skipped,
                    downloads.len()
                );
                last_progress = Instant::now();
            }
        }

        while let Some(outcome) = downloads.next().await {
            record_download(outcome, sink, &mut report, service).await?;
        }

        sink.flush().await?;

        info!(
            "✨ Sync completed! {} documents | {} attachments | {} skipped | {} failed downloads | {:.1}s",
            report.documents,
            report.attachments,
            report.skipped,
            report.failed_downloads,
            started.elapsed().as_secs_f64()
        );

        Ok(report)
    }
}

async fn record_download(
    outcome: DownloadOutcome,
    sink: &mut DocumentSink,
    report: &mut SyncReport,
    service: &'static str,
) -> Result<()> {
    let (id, result, elapsed) = outcome;
    histogram!("connector_fetch_duration_ms", "service" => service)
        .record(elapsed.as_millis() as f64);

    match result {
        Ok(Some(attachment)) => {
            sink.write_attachment(&attachment).await?;
            report.attachments += 1;
            counter!("connector_attachments_emitted", "service" => service).increment(1);
        }
        Ok(None) => {
            report.skipped += 1;
            counter!("connector_content_skipped", "service" => service).increment(1);
        }
        Err(e) => {
            // The document was already emitted; only its content is lost.
            report.failed_downloads += 1;
            counter!("connector_download_errors", "service" => service).increment(1);
            warn!(id = %id, error = %e, "Content download failed");
        }
    }
    Ok(())
}
