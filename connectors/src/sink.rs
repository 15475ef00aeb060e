use crate::model::{Attachment, Document};
use connector_core::config::OutputConfig;
use connector_core::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::info;

/// NDJSON writer for documents and attachments.
///
/// One JSON object per line, in emission order. The sink does not reorder
/// or deduplicate; that is the downstream pipeline's job.
pub struct DocumentSink {
    writer: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
    documents: u64,
    attachments: u64,
}

impl DocumentSink {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(tokio::io::stdout()))
    }

    pub async fn create(path: &str) -> Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        info!(path, "Writing documents to file");
        Ok(Self::from_writer(Box::new(file)))
    }

    pub async fn from_config(output: &OutputConfig) -> Result<Self> {
        match &output.path {
            Some(path) => Self::create(path).await,
            None => Ok(Self::stdout()),
        }
    }

    fn from_writer(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            documents: 0,
            attachments: 0,
        }
    }

    pub async fn write_document(&mut self, document: &Document) -> Result<()> {
        let line = serde_json::to_vec(document)?;
        self.write_line(&line).await?;
        self.documents += 1;
        Ok(())
    }

    pub async fn write_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        let line = serde_json::to_vec(attachment)?;
        self.write_line(&line).await?;
        self.attachments += 1;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    pub fn documents_written(&self) -> u64 {
        self.documents
    }

    pub fn attachments_written(&self) -> u64 {
        self.attachments
    }
}
