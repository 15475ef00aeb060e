use connector_core::config::{DirectorySourceConfig, FetchConfig};
use connectors::fetch::ContentFetcher;
use connectors::model::Document;
use connectors::pipeline::SyncPipeline;
use connectors::sink::DocumentSink;
use connectors::source::{DataSource, DirectorySource};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn source(directory: &Path, pattern: &str) -> DirectorySource {
    DirectorySource::new(
        &DirectorySourceConfig {
            directory: directory.to_string_lossy().into_owned(),
            pattern: pattern.to_string(),
        },
        &FetchConfig::default(),
    )
    .unwrap()
}

fn sample_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
    std::fs::write(dir.path().join("b.bin"), [0u8, 1, 2, 3]).unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("c.md"), b"# notes").unwrap();
    dir
}

async fn collect(
    source: &DirectorySource,
) -> BTreeMap<String, (Document, Option<ContentFetcher>)> {
    let mut stream = source.fetch_documents();
    let mut items = BTreeMap::new();
    while let Some(item) = stream.next().await {
        let (document, fetcher) = item.expect("enumeration failed");
        items.insert(file_name(&document), (document, fetcher));
    }
    items
}

fn file_name(document: &Document) -> String {
    let path = document
        .field("path")
        .and_then(|value| value.as_str())
        .expect("document has no path");
    Path::new(path)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

#[tokio::test]
async fn enumerates_every_matching_file_with_metadata() {
    let dir = sample_tree();
    let source = source(dir.path(), "**/*.*");
    let items = collect(&source).await;

    let names: Vec<&String> = items.keys().collect();
    assert_eq!(names, vec!["a.txt", "b.bin", "c.md"]);

    let (document, fetcher) = &items["a.txt"];
    assert_eq!(document.id.len(), 64);
    assert_eq!(document.field("size"), Some(&serde_json::json!(11)));
    assert!(fetcher.is_some());

    let value = serde_json::to_value(document).unwrap();
    assert!(value["_timestamp"].is_string());
    assert!(value["last_modified_time"].is_string());
}

#[tokio::test]
async fn content_is_downloaded_for_allowed_extensions_only() {
    let dir = sample_tree();
    let source = source(dir.path(), "**/*.*");
    let items = collect(&source).await;

    let attachment = items["a.txt"]
        .1
        .as_ref()
        .unwrap()
        .fetch(true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attachment.content, "aGVsbG8gd29ybGQ=");

    // .bin is not an indexable format, so the gate declines it.
    assert!(items["b.bin"]
        .1
        .as_ref()
        .unwrap()
        .fetch(true)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn content_is_skipped_when_not_requested() {
    let dir = sample_tree();
    let source = source(dir.path(), "**/*.*");
    let items = collect(&source).await;

    let fetched = items["a.txt"].1.as_ref().unwrap().fetch(false).await.unwrap();
    assert!(fetched.is_none());
}

#[tokio::test]
async fn pattern_restricts_the_enumeration() {
    let dir = sample_tree();
    let source = source(dir.path(), "**/*.txt");
    let items = collect(&source).await;

    let names: Vec<&String> = items.keys().collect();
    assert_eq!(names, vec!["a.txt"]);
}

#[tokio::test]
async fn empty_directory_yields_no_documents() {
    let dir = tempfile::tempdir().unwrap();
    let source = source(dir.path(), "**/*.*");
    assert!(collect(&source).await.is_empty());
}

#[tokio::test]
async fn document_ids_are_stable_across_passes() {
    let dir = sample_tree();
    let source = source(dir.path(), "**/*.*");

    let first: Vec<String> = collect(&source)
        .await
        .into_values()
        .map(|(document, _)| document.id)
        .collect();
    let second: Vec<String> = collect(&source)
        .await
        .into_values()
        .map(|(document, _)| document.id)
        .collect();

    assert_eq!(first, second);
}

#[tokio::test]
async fn sync_pipeline_writes_documents_and_admitted_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
    std::fs::write(dir.path().join("b.bin"), [0u8, 1, 2, 3]).unwrap();

    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("documents.ndjson");

    let source = Arc::new(source(dir.path(), "**/*.*"));
    let pipeline = SyncPipeline::new(source, 4);
    let mut sink = DocumentSink::create(output.to_str().unwrap()).await.unwrap();

    let report = pipeline.run(&mut sink, true).await.unwrap();
    sink.flush().await.unwrap();

    assert_eq!(report.documents, 2);
    assert_eq!(report.attachments, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed_downloads, 0);

    let raw = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines.iter().filter(|v| v.get("path").is_some()).count(), 2);
    let attachment = lines
        .iter()
        .find(|v| v.get("_attachment").is_some())
        .expect("no attachment line written");
    assert_eq!(attachment["_attachment"], "aGVsbG8gd29ybGQ=");
}
