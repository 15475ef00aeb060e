use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Normalized document emitted by every source.
///
/// `id` must be stable across passes for the same external entry so that
/// downstream consumers can deduplicate and detect deletions.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Full-content companion record for a document, emitted only when the
/// content fetch gate admits the entry.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Base64-encoded raw bytes.
    #[serde(rename = "_attachment")]
    pub content: String,
}

/// Entry kinds a source can yield. Anything else is dropped at the
/// deserialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "File",
            EntryKind::Folder => "Folder",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to download one entry's bytes later, captured by value
/// at enumeration time so the fetch does not depend on listing state.
#[derive(Debug, Clone)]
pub struct ContentRef {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// File name including extension, used for type gating.
    pub name: String,
    pub size: u64,
    /// False when the backing service cannot serve the raw bytes.
    pub downloadable: bool,
    pub locator: ContentLocator,
}

/// Where and how to read the bytes for one entry.
#[derive(Debug, Clone)]
pub enum ContentLocator {
    LocalFile { path: PathBuf },
    DropboxFile { path: String },
    /// Paper documents have no raw bytes and must be exported instead.
    DropboxExport { path: String },
    SharedLink { url: String },
}
