use crate::pipeline::{SyncPipeline, SyncReport};
use crate::sink::DocumentSink;
use crate::source::{DataSource, DirectorySource, DropboxSource};
use connector_core::config::{Config, OutputConfig, SourceConfig};
use connector_core::Result;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct App {
    config: Config,
    source: Arc<dyn DataSource>,
}

impl App {
    #[instrument(skip(config))]
    pub fn new(config: Config) -> Result<Self> {
        let source = build_source(&config)?;
        info!(service = source.service_type(), "Connector initialized");
        Ok(Self { config, source })
    }

    pub async fn validate(&self) -> Result<()> {
        self.source.validate().await
    }

    pub async fn ping(&self) -> Result<()> {
        self.source.ping().await
    }

    /// One full enumeration pass. Validates the configured location first so
    /// bad configuration surfaces before anything is emitted.
    pub async fn sync(
        &self,
        fetch_content: bool,
        output_override: Option<String>,
    ) -> Result<SyncReport> {
        self.source.validate().await?;

        let output = OutputConfig {
            path: output_override.or_else(|| self.config.output.path.clone()),
        };
        let mut sink = DocumentSink::from_config(&output).await?;

        let pipeline = SyncPipeline::new(
            Arc::clone(&self.source),
            self.config.fetch.concurrent_downloads,
        );
        pipeline.run(&mut sink, fetch_content).await
    }
}

/// Instantiates the source named by the `service` tag.
pub fn build_source(config: &Config) -> Result<Arc<dyn DataSource>> {
    let source: Arc<dyn DataSource> = match &config.source {
        SourceConfig::Dir(dir) => Arc::new(DirectorySource::new(dir, &config.fetch)?),
        SourceConfig::Dropbox(dropbox) => Arc::new(DropboxSource::new(
            dropbox,
            &config.fetch,
            &config.retry,
        )?),
    };
    Ok(source)
}
