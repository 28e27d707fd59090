use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;

use crate::document::{RuleHit, TransformResult};
use crate::title::TitleOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Dry,
    Live,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dry => "dry",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Changed,
    Unchanged,
    Skipped,
    Errored,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub name: String,
    pub status: DocumentStatus,
    pub changes: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fired: Vec<RuleHit>,
    pub input_hash: Option<String>,
    pub output_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub written: bool,
}

impl DocumentReport {
    pub fn skipped(name: &str, reason: &str) -> Self {
        Self::bare(name, DocumentStatus::Skipped, Some(reason.to_string()))
    }

    pub fn errored(name: &str, error: &anyhow::Error) -> Self {
        Self::bare(name, DocumentStatus::Errored, Some(format!("{error:#}")))
    }

    fn bare(name: &str, status: DocumentStatus, detail: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            changes: 0,
            fired: Vec::new(),
            input_hash: None,
            output_hash: None,
            diff: None,
            detail,
            written: false,
        }
    }

    pub fn changed(&self) -> bool {
        self.status == DocumentStatus::Changed
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub documents: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errored: usize,
    pub total_changes: usize,
    pub written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub summary: RunSummary,
    pub documents: Vec<DocumentReport>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub verbose: bool,
    pub diff: bool,
}

/// Destination for live-mode output.
pub trait DocumentSink: Sync {
    fn write(&self, relative_path: &Path, contents: &[u8]) -> Result<()>;
}

/// Collects per-document outcomes in the order they are pushed.
#[derive(Debug)]
pub struct RunReporter {
    mode: RunMode,
    options: ReportOptions,
    documents: Vec<DocumentReport>,
}

impl RunReporter {
    pub fn new(mode: RunMode, options: ReportOptions) -> Self {
        Self {
            mode,
            options,
            documents: Vec::new(),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Build the report for one transformed document without recording it.
    pub fn document_report(
        &self,
        name: &str,
        original: &str,
        result: &TransformResult,
    ) -> DocumentReport {
        let changed = result.changed(original);
        let diff = (changed && self.options.diff)
            .then(|| unified_diff(name, original, &result.text));
        let detail = (!result.rule_errors.is_empty()).then(|| {
            result
                .rule_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        });
        DocumentReport {
            name: name.to_string(),
            status: if changed {
                DocumentStatus::Changed
            } else {
                DocumentStatus::Unchanged
            },
            changes: result.total_changes,
            fired: if self.options.verbose {
                result.per_rule_log.clone()
            } else {
                Vec::new()
            },
            input_hash: Some(content_hash(original)),
            output_hash: Some(content_hash(&result.text)),
            diff,
            detail,
            written: false,
        }
    }

    pub fn title_report(&self, title: &str, outcome: &TitleOutcome) -> DocumentReport {
        let status = if outcome.new_title.is_some() {
            DocumentStatus::Changed
        } else {
            DocumentStatus::Unchanged
        };
        let detail = match (&outcome.new_title, outcome.redirect) {
            (Some(new_title), true) => Some(format!("{new_title} (redirect)")),
            (Some(new_title), false) => Some(new_title.clone()),
            (None, true) => Some("redirect".to_string()),
            (None, false) => None,
        };
        DocumentReport {
            changes: usize::from(outcome.new_title.is_some()),
            detail,
            ..DocumentReport::bare(title, status, None)
        }
    }

    /// Pass output to the sink in live mode. Dry mode never touches the sink.
    pub fn emit(
        &self,
        sink: &dyn DocumentSink,
        relative_path: &Path,
        contents: &[u8],
    ) -> Result<bool> {
        match self.mode {
            RunMode::Dry => Ok(false),
            RunMode::Live => {
                sink.write(relative_path, contents)?;
                Ok(true)
            }
        }
    }

    pub fn push(&mut self, report: DocumentReport) {
        self.documents.push(report);
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            documents: self.documents.len(),
            ..RunSummary::default()
        };
        for document in &self.documents {
            match document.status {
                DocumentStatus::Changed => summary.changed += 1,
                DocumentStatus::Unchanged => summary.unchanged += 1,
                DocumentStatus::Skipped => summary.skipped += 1,
                DocumentStatus::Errored => summary.errored += 1,
            }
            summary.total_changes += document.changes;
            if document.written {
                summary.written += 1;
            }
        }
        summary
    }

    pub fn finish(self) -> RunReport {
        let summary = self.summary();
        RunReport {
            mode: self.mode,
            summary,
            documents: self.documents,
        }
    }
}

pub fn unified_diff(name: &str, old: &str, new: &str) -> String {
    let old_header = format!("a/{name}");
    let new_header = format!("b/{name}");
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string()
}

pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(PathBuf, String)>>,
    }

    impl DocumentSink for RecordingSink {
        fn write(&self, relative_path: &Path, contents: &[u8]) -> Result<()> {
            self.writes
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push((
                    relative_path.to_path_buf(),
                    String::from_utf8_lossy(contents).into_owned(),
                ));
            Ok(())
        }
    }

    fn result(text: &str, total_changes: usize) -> TransformResult {
        TransformResult {
            text: text.to_string(),
            total_changes,
            per_rule_log: vec![RuleHit {
                rule: 0,
                matches: total_changes,
            }],
            rule_errors: Vec::new(),
        }
    }

    #[test]
    fn dry_mode_never_writes() {
        let reporter = RunReporter::new(RunMode::Dry, ReportOptions::default());
        let sink = RecordingSink::default();
        let wrote = reporter
            .emit(&sink, Path::new("a.xml"), b"text")
            .expect("emit");
        assert!(!wrote);
        assert!(sink.writes.lock().expect("lock").is_empty());
    }

    #[test]
    fn live_mode_passes_text_to_sink() {
        let reporter = RunReporter::new(RunMode::Live, ReportOptions::default());
        let sink = RecordingSink::default();
        let wrote = reporter
            .emit(&sink, Path::new("a.xml"), b"text")
            .expect("emit");
        assert!(wrote);
        assert_eq!(
            sink.writes.lock().expect("lock").as_slice(),
            &[(PathBuf::from("a.xml"), "text".to_string())]
        );
    }

    #[test]
    fn document_report_includes_diff_and_rules_when_requested() {
        let reporter = RunReporter::new(
            RunMode::Dry,
            ReportOptions {
                verbose: true,
                diff: true,
            },
        );
        let report = reporter.document_report("Page.xml", "a\nb\n", &result("a\nc\n", 1));
        assert!(report.changed());
        assert_eq!(report.fired.len(), 1);
        let diff = report.diff.expect("diff");
        assert!(diff.contains("--- a/Page.xml"));
        assert!(diff.contains("-b"));
        assert!(diff.contains("+c"));
        assert_ne!(report.input_hash, report.output_hash);
    }

    #[test]
    fn quiet_report_omits_rule_log() {
        let reporter = RunReporter::new(RunMode::Dry, ReportOptions::default());
        let report = reporter.document_report("Page.xml", "x", &result("y", 1));
        assert!(report.fired.is_empty());
        assert!(report.diff.is_none());
    }

    #[test]
    fn summary_counts_every_status() {
        let mut reporter = RunReporter::new(RunMode::Live, ReportOptions::default());
        let mut changed = reporter.document_report("a", "x", &result("y", 2));
        changed.written = true;
        reporter.push(changed);
        let unchanged = reporter.document_report("b", "x", &result("x", 0));
        reporter.push(unchanged);
        reporter.push(DocumentReport::skipped("c.png", "not a page dump"));
        reporter.push(DocumentReport::errored(
            "d",
            &anyhow::anyhow!("failed to read d"),
        ));

        let report = reporter.finish();
        assert_eq!(
            report.summary,
            RunSummary {
                documents: 4,
                changed: 1,
                unchanged: 1,
                skipped: 1,
                errored: 1,
                total_changes: 2,
                written: 1,
            }
        );
        assert_eq!(report.documents[3].detail.as_deref(), Some("failed to read d"));
    }

    #[test]
    fn title_report_distinguishes_redirect_only() {
        let reporter = RunReporter::new(RunMode::Dry, ReportOptions::default());
        let report = reporter.title_report(
            "User:Example",
            &TitleOutcome {
                new_title: None,
                redirect: true,
            },
        );
        assert_eq!(report.status, DocumentStatus::Unchanged);
        assert_eq!(report.detail.as_deref(), Some("redirect"));
        assert_eq!(report.changes, 0);
    }

    #[test]
    fn content_hash_is_short_hex() {
        let hash = content_hash("hello");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
