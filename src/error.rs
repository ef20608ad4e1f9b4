//! Error types.
//!
//! One enum per failure class: configuration problems are fatal for the
//! affected service, everything else is recovered per request or session.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Load-time failures: unreadable files, malformed YAML, bad patterns.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to decode '{}': {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid pattern [{name}]={pattern}: {source}")]
    InvalidPattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unable to parse matcher expression '{0}'")]
    InvalidExpression(String),

    #[error("more than one matcher for '{0}'")]
    DuplicateMatcher(String),

    #[error("duplicate conversation name '{0}'")]
    DuplicateName(String),

    #[error("conversation '{name}': {reason}")]
    InvalidConversation { name: String, reason: String },

    #[error("snapshot '{}': {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
}

/// No conversation could be selected for a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("no conversation matched")]
    NoMatch,

    #[error("none of the {0} candidates appear in the score map")]
    NoCandidate(usize),
}

/// Failures while building a response. The response is discarded.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unable to read body file '{}': {source}", path.display())]
    BodyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("invalid response header '{0}'")]
    InvalidHeader(String),

    #[error("invalid raw response: {0}")]
    RawResponse(String),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// A script line failed. Remaining lines are skipped.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unable to spawn '{line}': {source}")]
    Spawn {
        line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("while executing '{line}': {status}")]
    Exit { line: String, status: ExitStatus },

    #[error("'{line}' did not finish within {timeout_ms}ms")]
    Timeout { line: String, timeout_ms: u64 },
}

/// Recording a live HTTP exchange failed.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid url '{url}': {reason}")]
    Url { url: String, reason: String },

    #[error("invalid header '{0}'")]
    Header(String),

    #[error("while creating http-request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("while doing http-request: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    #[error("while reading response: {0}")]
    Body(#[from] hyper::Error),

    #[error("while encoding yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unable to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A snapshot line could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("invalid number of parts: '{0}'")]
    Parts(String),

    #[error("invalid asn1 type '{0}'")]
    Asn1Type(String),

    #[error("unknown value type '{0}'")]
    ValueType(String),

    #[error("unable to decode {kind}/{value}")]
    Value { kind: String, value: String },
}
