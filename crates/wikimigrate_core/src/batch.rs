use std::fs;
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;

use anyhow::{Context, Result, bail};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::document::{TransformOptions, transform};
use crate::features::FeatureSet;
use crate::report::{
    DocumentReport, DocumentSink, ReportOptions, RunMode, RunReport, RunReporter,
};
use crate::rules::RuleSet;
use crate::title::transform_title;

pub const DEFAULT_EXTENSIONS: &[&str] = &["xml"];

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: RunMode,
    pub report: ReportOptions,
    pub transform: TransformOptions,
    /// Worker threads; `None` uses every core, `Some(1)` runs in place.
    pub jobs: Option<usize>,
    pub extensions: Vec<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Dry,
            report: ReportOptions::default(),
            transform: TransformOptions::default(),
            jobs: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl BatchOptions {
    fn wants(&self, relative_path: &Path) -> bool {
        let Some(extension) = relative_path.extension().and_then(|value| value.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|wanted| same_extension(wanted, extension))
    }
}

fn same_extension(wanted: &str, extension: &str) -> bool {
    wanted
        .trim_start_matches('.')
        .eq_ignore_ascii_case(extension)
}

/// Writes documents under a root directory, mirroring their relative paths.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl DocumentSink for DirectorySink {
    fn write(&self, relative_path: &Path, contents: &[u8]) -> Result<()> {
        let target = self.root.join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&target, contents)
            .with_context(|| format!("failed to write {}", target.display()))
    }
}

struct DiscardSink;

impl DocumentSink for DiscardSink {
    fn write(&self, _relative_path: &Path, _contents: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum Listed {
    File(PathBuf),
    Unreadable { name: String, error: anyhow::Error },
}

/// Every regular file under `input_dir`, relative to it, in sorted path order.
pub fn enumerate_documents(input_dir: &Path) -> Result<Vec<Listed>> {
    if !input_dir.is_dir() {
        bail!("input directory not found: {}", normalize_path(input_dir));
    }

    let mut listed = Vec::new();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(input_dir)
                    .with_context(|| {
                        format!("{} is outside the input directory", entry.path().display())
                    })?
                    .to_path_buf();
                listed.push(Listed::File(relative));
            }
            Err(error) => {
                let name = error
                    .path()
                    .map(normalize_path)
                    .unwrap_or_else(|| "<unknown>".to_string());
                warn!(%error, "failed to enumerate input entry");
                listed.push(Listed::Unreadable {
                    name,
                    error: anyhow::Error::new(error),
                });
            }
        }
    }
    Ok(listed)
}

/// Transform every document under `input_dir`. Live mode writes the complete
/// set (rewritten or verbatim) under `output_dir`; dry mode writes nothing.
pub fn run_batch(
    input_dir: &Path,
    output_dir: Option<&Path>,
    rules: &RuleSet,
    features: &FeatureSet,
    options: &BatchOptions,
) -> Result<RunReport> {
    let sink: Box<dyn DocumentSink> = match (options.mode, output_dir) {
        (RunMode::Live, Some(output_dir)) => Box::new(DirectorySink::new(output_dir)),
        (RunMode::Live, None) => bail!("live mode requires an output directory"),
        (RunMode::Dry, _) => Box::new(DiscardSink),
    };
    let listed = enumerate_documents(input_dir)?;
    info!(
        input = %normalize_path(input_dir),
        documents = listed.len(),
        mode = options.mode.as_str(),
        "starting batch"
    );

    let mut reporter = RunReporter::new(options.mode, options.report);
    let process = |entry: &Listed| match entry {
        Listed::File(relative) => process_document(
            input_dir,
            relative,
            rules,
            features,
            options,
            &reporter,
            sink.as_ref(),
        ),
        Listed::Unreadable { name, error } => DocumentReport::errored(name, error),
    };

    let reports = match options.jobs {
        Some(1) => listed.iter().map(process).collect::<Vec<_>>(),
        Some(jobs) => ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("failed to build worker pool")?
            .install(|| listed.par_iter().map(process).collect::<Vec<_>>()),
        None => listed.par_iter().map(process).collect::<Vec<_>>(),
    };

    for report in reports {
        reporter.push(report);
    }
    let report = reporter.finish();
    info!(
        documents = report.summary.documents,
        changed = report.summary.changed,
        errored = report.summary.errored,
        "batch finished"
    );
    Ok(report)
}

fn process_document(
    input_dir: &Path,
    relative: &Path,
    rules: &RuleSet,
    features: &FeatureSet,
    options: &BatchOptions,
    reporter: &RunReporter,
    sink: &dyn DocumentSink,
) -> DocumentReport {
    let name = normalize_path(relative);
    let source = input_dir.join(relative);

    if !options.wants(relative) {
        let copied = fs::read(&source)
            .with_context(|| format!("failed to read {}", source.display()))
            .and_then(|bytes| reporter.emit(sink, relative, &bytes));
        return match copied {
            Ok(written) => DocumentReport {
                written,
                ..DocumentReport::skipped(&name, "extension not selected; copied verbatim")
            },
            Err(error) => {
                warn!(document = %name, error = %format!("{error:#}"), "copy failed");
                DocumentReport::errored(&name, &error)
            }
        };
    }

    let bytes = match fs::read(&source)
        .with_context(|| format!("failed to read {}", source.display()))
    {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(document = %name, error = %format!("{error:#}"), "read failed");
            return DocumentReport::errored(&name, &error);
        }
    };
    let original = match String::from_utf8(bytes) {
        Ok(original) => original,
        Err(invalid) => return copy_undecodable(&name, relative, invalid, reporter, sink),
    };

    let result = transform(&original, &name, rules, features, &options.transform);
    let mut report = reporter.document_report(&name, &original, &result);
    match reporter.emit(sink, relative, result.text.as_bytes()) {
        Ok(written) => report.written = written,
        Err(error) => {
            warn!(document = %name, error = %format!("{error:#}"), "write failed");
            return DocumentReport::errored(&name, &error);
        }
    }
    report
}

/// A selected document that is not UTF-8 is still emitted byte for byte so the
/// output set stays complete, but it counts as errored.
fn copy_undecodable(
    name: &str,
    relative: &Path,
    invalid: FromUtf8Error,
    reporter: &RunReporter,
    sink: &dyn DocumentSink,
) -> DocumentReport {
    let error = anyhow::Error::new(invalid.utf8_error())
        .context(format!("{name} is not valid UTF-8; copied verbatim"));
    warn!(document = %name, error = %format!("{error:#}"), "decode failed");
    match reporter.emit(sink, relative, invalid.as_bytes()) {
        Ok(written) => DocumentReport {
            written,
            ..DocumentReport::errored(name, &error)
        },
        Err(copy_error) => {
            warn!(document = %name, error = %format!("{copy_error:#}"), "copy failed");
            DocumentReport::errored(name, &copy_error)
        }
    }
}

/// Run the title cascade over a list of titles. Titles are never persisted.
pub fn run_titles(
    titles: &[String],
    rules: &RuleSet,
    features: &FeatureSet,
    report: ReportOptions,
) -> RunReport {
    let mut reporter = RunReporter::new(RunMode::Dry, report);
    for title in titles {
        let outcome = transform_title(title, rules, features);
        let entry = reporter.title_report(title, &outcome);
        reporter.push(entry);
    }
    reporter.finish()
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
