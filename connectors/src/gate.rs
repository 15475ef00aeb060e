use crate::model::ContentRef;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Hard ceiling for full-content downloads, in bytes (20 MiB).
pub const MAX_CONTENT_SIZE: u64 = 20 * 1024 * 1024;

/// Extensions the downstream text extractor understands. Everything else is
/// enumerated as metadata only.
static SUPPORTED_FILETYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "txt", "py", "rst", "html", "markdown", "json", "xml", "csv", "md", "ppt", "rtf", "docx",
        "odt", "xls", "xlsx", "rb", "paper", "sh", "pptx", "pdf", "doc",
    ]
    .into_iter()
    .collect()
});

/// Decides whether an entry's bytes are worth downloading at all.
#[derive(Debug, Clone, Copy)]
pub struct FetchGate {
    extraction_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    Fetch,
    Skip(SkipReason),
}

impl FetchDecision {
    pub fn is_fetch(&self) -> bool {
        matches!(self, FetchDecision::Fetch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRequested,
    ExtractionDisabled,
    Empty,
    TooLarge,
    NotDownloadable,
    NoExtension,
    UnsupportedExtension,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NotRequested => "content not requested",
            SkipReason::ExtractionDisabled => "content extraction disabled",
            SkipReason::Empty => "file is empty",
            SkipReason::TooLarge => "file exceeds the size limit",
            SkipReason::NotDownloadable => "file is not downloadable",
            SkipReason::NoExtension => "file has no extension",
            SkipReason::UnsupportedExtension => "file type is not supported",
        };
        f.write_str(reason)
    }
}

impl FetchGate {
    pub fn new(extraction_enabled: bool) -> Self {
        Self { extraction_enabled }
    }

    /// `doit` is the caller's per-pass request for content; everything else
    /// comes from the entry itself.
    pub fn evaluate(&self, reference: &ContentRef, doit: bool) -> FetchDecision {
        if !doit {
            return FetchDecision::Skip(SkipReason::NotRequested);
        }
        if !self.extraction_enabled {
            return FetchDecision::Skip(SkipReason::ExtractionDisabled);
        }
        if reference.size == 0 {
            return FetchDecision::Skip(SkipReason::Empty);
        }
        if reference.size > MAX_CONTENT_SIZE {
            return FetchDecision::Skip(SkipReason::TooLarge);
        }
        if !reference.downloadable {
            return FetchDecision::Skip(SkipReason::NotDownloadable);
        }
        match file_extension(&reference.name) {
            None => FetchDecision::Skip(SkipReason::NoExtension),
            Some(ext) if !SUPPORTED_FILETYPES.contains(ext.as_str()) => {
                FetchDecision::Skip(SkipReason::UnsupportedExtension)
            }
            Some(_) => FetchDecision::Fetch,
        }
    }
}

fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentLocator;
    use chrono::Utc;
    use proptest::prelude::*;

    fn reference(name: &str, size: u64, downloadable: bool) -> ContentRef {
        ContentRef {
            id: "id:1".to_string(),
            timestamp: Utc::now(),
            name: name.to_string(),
            size,
            downloadable,
            locator: ContentLocator::DropboxFile {
                path: format!("/test/{name}"),
            },
        }
    }

    #[test]
    fn eligible_file_is_fetched() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("dummy_file.txt", 200, true), true);
        assert_eq!(decision, FetchDecision::Fetch);
    }

    #[test]
    fn doit_false_wins_over_everything() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("dummy_file.txt", 200, true), false);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::NotRequested));
    }

    #[test]
    fn disabled_extraction_skips_eligible_files() {
        let gate = FetchGate::new(false);
        let decision = gate.evaluate(&reference("dummy_file.txt", 200, true), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::ExtractionDisabled));
    }

    #[test]
    fn oversized_file_is_skipped() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("dummy_file.txt", 23_000_000, true), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::TooLarge));
    }

    #[test]
    fn ceiling_is_inclusive() {
        let gate = FetchGate::new(true);
        assert!(gate
            .evaluate(&reference("dummy_file.txt", MAX_CONTENT_SIZE, true), true)
            .is_fetch());
        assert!(!gate
            .evaluate(&reference("dummy_file.txt", MAX_CONTENT_SIZE + 1, true), true)
            .is_fetch());
    }

    #[test]
    fn non_downloadable_file_is_skipped() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("dummy_file.txt", 200, false), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::NotDownloadable));
    }

    #[test]
    fn missing_extension_is_skipped() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("dummy_file", 200, true), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::NoExtension));

        let decision = gate.evaluate(&reference(".bashrc", 200, true), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::NoExtension));
    }

    #[test]
    fn unsupported_extension_is_skipped() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("b.bin", 200, true), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::UnsupportedExtension));
    }

    #[test]
    fn extension_matching_ignores_case() {
        let gate = FetchGate::new(true);
        assert!(gate.evaluate(&reference("REPORT.TXT", 200, true), true).is_fetch());
    }

    #[test]
    fn empty_file_is_skipped() {
        let gate = FetchGate::new(true);
        let decision = gate.evaluate(&reference("dummy_file.txt", 0, true), true);
        assert_eq!(decision, FetchDecision::Skip(SkipReason::Empty));
    }

    proptest! {
        #[test]
        fn oversized_files_are_never_fetched(
            size in (MAX_CONTENT_SIZE + 1)..u64::MAX,
            doit in proptest::bool::ANY,
            extraction in proptest::bool::ANY,
        ) {
            let gate = FetchGate::new(extraction);
            let decision = gate.evaluate(&reference("dummy_file.txt", size, true), doit);
            prop_assert!(!decision.is_fetch());
        }
    }
}
