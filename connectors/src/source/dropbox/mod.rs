mod client;

use crate::fetch::{ContentFetcher, ContentReader};
use crate::gate::FetchGate;
use crate::model::{ContentLocator, ContentRef, Document, EntryKind};
use crate::source::{DataSource, DocumentStream};
use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use client::{DropboxClient, FileMetadata, FolderEntry, FolderMetadata, ReceivedFile, SharedLinkMetadata};
use connector_core::config::{DropboxSourceConfig, FetchConfig, RetryConfig};
use connector_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use client::{API_BASE_URL, CONTENT_BASE_URL};

/// Enumerates a Dropbox account: the owned folder tree under the configured
/// path first, then files shared into the account by other users.
pub struct DropboxSource {
    client: Arc<DropboxClient>,
    path: String,
    gate: FetchGate,
}

impl DropboxSource {
    pub fn new(config: &DropboxSourceConfig, fetch: &FetchConfig, retry: &RetryConfig) -> Result<Self> {
        let client = DropboxClient::new(config.clone(), retry.clone())?;
        Self::assemble(client, config, fetch)
    }

    /// Base URL override for tests and proxied deployments.
    pub fn with_base_urls(
        config: &DropboxSourceConfig,
        fetch: &FetchConfig,
        retry: &RetryConfig,
        api_base: impl Into<String>,
        content_base: impl Into<String>,
    ) -> Result<Self> {
        let client =
            DropboxClient::with_base_urls(config.clone(), retry.clone(), api_base, content_base)?;
        Self::assemble(client, config, fetch)
    }

    fn assemble(client: DropboxClient, config: &DropboxSourceConfig, fetch: &FetchConfig) -> Result<Self> {
        for (field, value) in [
            ("app_key", &config.app_key),
            ("app_secret", &config.app_secret),
            ("refresh_token", &config.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("source.{field} is required")));
            }
        }
        if !config.path.starts_with('/') {
            return Err(Error::Config(
                "source.path must be an absolute Dropbox path".to_string(),
            ));
        }

        Ok(Self {
            client: Arc::new(client),
            path: config.path.clone(),
            gate: FetchGate::new(fetch.enable_content_extraction),
        })
    }
}

#[async_trait]
impl DataSource for DropboxSource {
    fn service_type(&self) -> &'static str {
        "dropbox"
    }

    async fn validate(&self) -> Result<()> {
        // The root namespace always exists, no remote check needed.
        if self.path == "/" {
            return Ok(());
        }
        match self.client.check_path(&self.path).await {
            Ok(()) => Ok(()),
            Err(Error::InvalidPath(_)) => Err(Error::InvalidPath(self.path.clone())),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.client.current_account().await
    }

    fn fetch_documents(&self) -> DocumentStream {
        let client = Arc::clone(&self.client);
        let path = self.path.clone();
        let gate = self.gate;

        Box::pin(try_stream! {
            let reader: Arc<dyn ContentReader> = client.clone();

            info!(path = %path, "Listing Dropbox folder tree");
            let mut page = client.list_folder(&path).await?;
            let mut pages = 1u64;
            loop {
                let enumerated_at = Utc::now();
                for entry in page.entries.drain(..) {
                    match entry {
                        FolderEntry::Folder(folder) => {
                            yield (normalize_folder(&folder, enumerated_at), None);
                        }
                        FolderEntry::File(file) => {
                            let (document, reference) = normalize_file(&file, enumerated_at);
                            let fetcher = ContentFetcher::new(reference, gate, Arc::clone(&reader));
                            yield (document, Some(fetcher));
                        }
                        FolderEntry::Unknown => {
                            debug!("Dropped folder entry with an unrecognized tag");
                        }
                    }
                }
                if !page.has_more {
                    break;
                }
                let Some(cursor) = page.cursor.take() else { break };
                page = client.continue_folder_listing(&cursor).await?;
                pages += 1;
            }
            metrics::counter!("connector_pages_fetched", "service" => "dropbox").increment(pages);

            info!("Listing files shared with the account");
            let mut page = client.list_received_files().await?;
            loop {
                let enumerated_at = Utc::now();
                for received in page.entries.drain(..) {
                    let metadata = match client.shared_link_metadata(&received.preview_url).await {
                        Ok(metadata) => Ok(Some(metadata)),
                        Err(e @ Error::Authentication { .. }) | Err(e @ Error::RateLimited { .. }) => Err(e),
                        Err(e) => {
                            warn!(
                                id = %received.id,
                                name = %received.name,
                                error = %e,
                                "Skipping shared file with unreadable metadata"
                            );
                            Ok(None)
                        }
                    }?;
                    let Some(metadata) = metadata else { continue };

                    let (document, reference) =
                        normalize_shared_file(&received, &metadata, enumerated_at);
                    let fetcher = ContentFetcher::new(reference, gate, Arc::clone(&reader));
                    yield (document, Some(fetcher));
                }
                let Some(cursor) = page.cursor.take() else { break };
                page = client.continue_received_files(&cursor).await?;
            }
        })
    }
}

#[async_trait]
impl ContentReader for DropboxClient {
    async fn read(&self, locator: &ContentLocator) -> Result<Bytes> {
        self.download(locator).await
    }
}

fn normalize_folder(folder: &FolderMetadata, enumerated_at: DateTime<Utc>) -> Document {
    Document::new(folder.id.clone(), enumerated_at)
        .with_field("type", EntryKind::Folder.as_str())
        .with_field("name", folder.name.as_str())
        .with_field("file path", folder.path_display.clone().unwrap_or_default())
        .with_field("size", 0u64)
}

fn normalize_file(file: &FileMetadata, enumerated_at: DateTime<Utc>) -> (Document, ContentRef) {
    let timestamp = file
        .server_modified
        .or(file.client_modified)
        .unwrap_or(enumerated_at);

    let document = Document::new(file.id.clone(), timestamp)
        .with_field("type", EntryKind::File.as_str())
        .with_field("name", file.name.as_str())
        .with_field("file path", file.path_display.clone().unwrap_or_default())
        .with_field("size", file.size);

    let path = file
        .path_display
        .clone()
        .unwrap_or_else(|| file.id.clone());
    let (downloadable, locator) = if file.is_downloadable {
        (true, ContentLocator::DropboxFile { path })
    } else if file.name.ends_with(".paper") {
        // Paper documents report is_downloadable=false but can be exported.
        (true, ContentLocator::DropboxExport { path })
    } else {
        (false, ContentLocator::DropboxFile { path })
    };

    let reference = ContentRef {
        id: file.id.clone(),
        timestamp,
        name: file.name.clone(),
        size: file.size,
        downloadable,
        locator,
    };

    (document, reference)
}

fn normalize_shared_file(
    received: &ReceivedFile,
    metadata: &SharedLinkMetadata,
    enumerated_at: DateTime<Utc>,
) -> (Document, ContentRef) {
    let timestamp = metadata
        .server_modified
        .or(metadata.client_modified)
        .or(received.time_invited)
        .unwrap_or(enumerated_at);
    let size = metadata.size.unwrap_or(0);
    let url = metadata
        .url
        .clone()
        .unwrap_or_else(|| received.preview_url.clone());

    let document = Document::new(metadata.id.clone(), timestamp)
        .with_field("type", EntryKind::File.as_str())
        .with_field("name", metadata.name.as_str())
        .with_field("url", url.as_str())
        .with_field("size", size);

    let reference = ContentRef {
        id: metadata.id.clone(),
        timestamp,
        name: metadata.name.clone(),
        size,
        downloadable: true,
        locator: ContentLocator::SharedLink { url },
    };

    (document, reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        "2023-01-01T06:06:06Z".parse().unwrap()
    }

    #[test]
    fn folders_normalize_with_enumeration_time_and_zero_size() {
        let folder: FolderMetadata = serde_json::from_value(json!({
            "name": "dummy folder",
            "path_lower": "/test/dummy folder",
            "path_display": "/test/dummy folder",
            "id": "id:1",
        }))
        .unwrap();

        let document = normalize_folder(&folder, fixed_now());
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "_id": "id:1",
                "_timestamp": "2023-01-01T06:06:06Z",
                "type": "Folder",
                "name": "dummy folder",
                "file path": "/test/dummy folder",
                "size": 0,
            })
        );
    }

    #[test]
    fn files_normalize_with_server_modified_timestamp() {
        let file: FileMetadata = serde_json::from_value(json!({
            "name": "index.py",
            "path_lower": "/test/dummy folder/index.py",
            "path_display": "/test/dummy folder/index.py",
            "id": "id:2",
            "client_modified": "2022-06-06T06:06:06Z",
            "server_modified": "2023-01-01T06:06:06Z",
            "size": 200,
            "is_downloadable": true,
        }))
        .unwrap();

        let (document, reference) = normalize_file(&file, Utc::now());
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "_id": "id:2",
                "_timestamp": "2023-01-01T06:06:06Z",
                "type": "File",
                "name": "index.py",
                "file path": "/test/dummy folder/index.py",
                "size": 200,
            })
        );
        assert!(reference.downloadable);
        assert!(matches!(
            reference.locator,
            ContentLocator::DropboxFile { ref path } if path == "/test/dummy folder/index.py"
        ));
    }

    #[test]
    fn paper_files_fall_back_to_export() {
        let file: FileMetadata = serde_json::from_value(json!({
            "name": "dummy_file.paper",
            "path_display": "/test/dummy_file.paper",
            "id": "id:1",
            "server_modified": "2023-01-01T06:06:06Z",
            "size": 200,
            "is_downloadable": false,
        }))
        .unwrap();

        let (_, reference) = normalize_file(&file, Utc::now());
        assert!(reference.downloadable);
        assert!(matches!(
            reference.locator,
            ContentLocator::DropboxExport { ref path } if path == "/test/dummy_file.paper"
        ));
    }

    #[test]
    fn non_downloadable_files_keep_their_document() {
        let file: FileMetadata = serde_json::from_value(json!({
            "name": "dummy_file.txt",
            "path_display": "/test/dummy_file.txt",
            "id": "id:3",
            "server_modified": "2023-01-01T06:06:06Z",
            "size": 200,
            "is_downloadable": false,
        }))
        .unwrap();

        let (document, reference) = normalize_file(&file, Utc::now());
        assert_eq!(document.id, "id:3");
        assert!(!reference.downloadable);
    }

    #[test]
    fn shared_files_normalize_with_link_metadata() {
        let received: ReceivedFile = serde_json::from_value(json!({
            "access_type": {".tag": "viewer"},
            "name": "index1.py",
            "id": "id:1",
            "time_invited": "2023-01-01T06:06:06Z",
            "preview_url": "https://www.dropbox.com/scl/fi/a1xtoxyu0ux73pd7e77ul/index1.py?dl=0",
        }))
        .unwrap();
        let metadata: SharedLinkMetadata = serde_json::from_value(json!({
            "name": "index1.py",
            "id": "id:1",
            "client_modified": "2023-01-01T06:06:06Z",
            "server_modified": "2023-01-01T06:06:06Z",
            "size": 200,
            "preview_type": "text",
            "url": "https://www.dropbox.com/scl/fi/a1xtoxyu0ux73pd7e77ul/index1.py?dl=0",
        }))
        .unwrap();

        let (document, reference) = normalize_shared_file(&received, &metadata, Utc::now());
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "_id": "id:1",
                "_timestamp": "2023-01-01T06:06:06Z",
                "type": "File",
                "name": "index1.py",
                "url": "https://www.dropbox.com/scl/fi/a1xtoxyu0ux73pd7e77ul/index1.py?dl=0",
                "size": 200,
            })
        );
        assert!(matches!(reference.locator, ContentLocator::SharedLink { .. }));
    }

    #[test]
    fn relative_path_is_rejected_at_construction() {
        let config = DropboxSourceConfig {
            path: "shared".to_string(),
            app_key: "abc#123".to_string(),
            app_secret: "abc#123".to_string(),
            refresh_token: "abc#123".to_string(),
        };
        let result = DropboxSource::new(&config, &FetchConfig::default(), &RetryConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn blank_credentials_are_rejected_at_construction() {
        let config = DropboxSourceConfig {
            path: "/".to_string(),
            app_key: "abc#123".to_string(),
            app_secret: "  ".to_string(),
            refresh_token: "abc#123".to_string(),
        };
        let result = DropboxSource::new(&config, &FetchConfig::default(), &RetryConfig::default());
        assert!(result.is_err());
    }
}
