use crate::fetch::{ContentFetcher, ContentReader};
use crate::gate::FetchGate;
use crate::model::{ContentLocator, ContentRef, Document};
use crate::source::{DataSource, DocumentStream};
use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use connector_core::config::{DirectorySourceConfig, FetchConfig};
use connector_core::{Error, Result};
use globset::{Glob, GlobMatcher};
use sha2::{Digest, Sha256};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Enumerates files under a local directory tree.
pub struct DirectorySource {
    directory: PathBuf,
    pattern: GlobMatcher,
    gate: FetchGate,
    reader: Arc<dyn ContentReader>,
}

impl DirectorySource {
    pub fn new(config: &DirectorySourceConfig, fetch: &FetchConfig) -> Result<Self> {
        if config.directory.trim().is_empty() {
            return Err(Error::Config("source.directory is required".to_string()));
        }

        let directory = std::path::absolute(&config.directory)?;
        let pattern = Glob::new(&config.pattern)
            .map_err(|e| Error::Config(format!("invalid glob pattern {:?}: {e}", config.pattern)))?
            .compile_matcher();

        Ok(Self {
            directory,
            pattern,
            gate: FetchGate::new(fetch.enable_content_extraction),
            reader: Arc::new(LocalReader),
        })
    }

    fn check_directory(&self) -> Result<()> {
        if self.directory.is_dir() {
            Ok(())
        } else {
            Err(Error::InvalidPath(
                self.directory.to_string_lossy().into_owned(),
            ))
        }
    }
}

#[async_trait]
impl DataSource for DirectorySource {
    fn service_type(&self) -> &'static str {
        "dir"
    }

    async fn validate(&self) -> Result<()> {
        self.check_directory()
    }

    async fn ping(&self) -> Result<()> {
        self.check_directory()
    }

    fn fetch_documents(&self) -> DocumentStream {
        let root = self.directory.clone();
        let pattern = self.pattern.clone();
        let gate = self.gate;
        let reader = Arc::clone(&self.reader);

        Box::pin(try_stream! {
            info!(directory = %root.display(), "Listing directory");

            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable directory entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                if !pattern.is_match(relative) {
                    debug!(path = %entry.path().display(), "Path does not match pattern");
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                        continue;
                    }
                };

                let (document, reference) = normalize_entry(entry.path(), &metadata);
                let fetcher = ContentFetcher::new(reference, gate, Arc::clone(&reader));
                yield (document, Some(fetcher));
            }
        })
    }
}

/// Builds the document and its download reference from one file's metadata.
fn normalize_entry(path: &Path, metadata: &Metadata) -> (Document, ContentRef) {
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    let mut document = Document::new(document_id(path), modified)
        .with_field("path", path.to_string_lossy().as_ref())
        .with_field("size", metadata.len())
        .with_field("last_modified_time", serde_json::json!(modified));
    document = stat_fields(document, metadata);

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let reference = ContentRef {
        id: document.id.clone(),
        timestamp: modified,
        name,
        size: metadata.len(),
        downloadable: true,
        locator: ContentLocator::LocalFile {
            path: path.to_path_buf(),
        },
    };

    (document, reference)
}

/// Stable id for a file: SHA-256 of its absolute path.
fn document_id(path: &Path) -> String {
    hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()))
}

#[cfg(unix)]
fn stat_fields(document: Document, metadata: &Metadata) -> Document {
    use std::os::unix::fs::MetadataExt;

    let mut document = document
        .with_field("inode_protection_mode", metadata.mode())
        .with_field("inode_number", metadata.ino())
        .with_field("device_inode_reside", metadata.dev())
        .with_field("number_of_links", metadata.nlink())
        .with_field("uid", metadata.uid())
        .with_field("gid", metadata.gid());
    if let Some(changed) = DateTime::from_timestamp(metadata.ctime(), 0) {
        document = document.with_field("ctime", serde_json::json!(changed));
    }
    if let Some(accessed) = DateTime::from_timestamp(metadata.atime(), 0) {
        document = document.with_field("last_access_time", serde_json::json!(accessed));
    }
    document
}

#[cfg(not(unix))]
fn stat_fields(document: Document, _metadata: &Metadata) -> Document {
    document
}

struct LocalReader;

#[async_trait]
impl ContentReader for LocalReader {
    async fn read(&self, locator: &ContentLocator) -> Result<Bytes> {
        match locator {
            ContentLocator::LocalFile { path } => Ok(Bytes::from(tokio::fs::read(path).await?)),
            other => Err(Error::Source {
                service: "dir".to_string(),
                details: format!("unsupported locator: {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_core::config::FetchConfig;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn source(directory: &str) -> Result<DirectorySource> {
        DirectorySource::new(
            &DirectorySourceConfig {
                directory: directory.to_string(),
                pattern: "**/*.*".to_string(),
            },
            &FetchConfig::default(),
        )
    }

    #[test]
    fn ids_are_stable_and_distinct() {
        let a = document_id(Path::new("/data/a.txt"));
        assert_eq!(a, document_id(Path::new("/data/a.txt")));
        assert_ne!(a, document_id(Path::new("/data/b.txt")));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_directory_is_rejected() {
        assert!(source("   ").is_err());
    }

    proptest! {
        #[test]
        fn ids_are_deterministic_for_any_path(raw in "/[a-zA-Z0-9 ./_-]{1,80}") {
            let first = document_id(Path::new(&raw));
            prop_assert_eq!(&first, &document_id(Path::new(&raw)));
            prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let result = DirectorySource::new(
            &DirectorySourceConfig {
                directory: "/tmp".to_string(),
                pattern: "a{".to_string(),
            },
            &FetchConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn normalized_entry_carries_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        let (document, reference) = normalize_entry(&path, &metadata);

        assert_eq!(document.id, document_id(&path));
        assert_eq!(document.field("size"), Some(&serde_json::json!(11)));
        assert_eq!(
            document.field("path"),
            Some(&serde_json::json!(path.to_string_lossy()))
        );
        assert_eq!(reference.name, "a.txt");
        assert_eq!(reference.size, 11);
        assert!(reference.downloadable);
    }

    #[tokio::test]
    async fn validate_rejects_missing_directory() {
        let source = source("/definitely/not/a/real/directory").unwrap();
        assert!(source.validate().await.is_err());
    }

    #[tokio::test]
    async fn ping_succeeds_on_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path().to_str().unwrap()).unwrap();
        assert!(source.ping().await.is_ok());
    }
}
