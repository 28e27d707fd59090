use std::path::PathBuf;

use thiserror::Error;

/// The rule source could not be obtained. Nothing can run without rules.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("rule source not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to read rule source {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed rule source {origin}: {message}")]
    Malformed { origin: String, message: String },
}

/// One rule's pattern or flags could not be compiled. The rule is kept in
/// sequence but skipped by every transformer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleCompileError {
    #[error("rule #{index}: invalid pattern `{pattern}`: {message}")]
    Pattern {
        index: usize,
        pattern: String,
        message: String,
    },
    #[error("rule #{index}: unsupported flag `{flag}` in `{flags}`")]
    Flag {
        index: usize,
        flag: char,
        flags: String,
    },
    #[error("rule #{index}: unsupported replacement token `{token}`")]
    Template { index: usize, token: String },
}

/// A rule failed while being applied to one document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rule #{index} failed on {document}: {message}")]
pub struct ApplyError {
    pub index: usize,
    pub document: String,
    pub message: String,
}

/// The title-existence check against the remote catalog failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("remote title check for `{title}` failed: {message}")]
pub struct RemoteCheckError {
    pub title: String,
    pub message: String,
    pub transient: bool,
}

impl RemoteCheckError {
    pub fn transient(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            transient: false,
        }
    }
}
