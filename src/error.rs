//! Error types for the agent library.
//!
//! Each collaborator has its own error enum; `AgentError` is what a run
//! returns when it has to stop for a reason other than a graceful halt.

use std::time::Duration;

use thiserror::Error;

/// The decision service's text could not be turned into a JSON object.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("no JSON object found in decision output: {raw}")]
    NoJsonObject { raw: String },

    #[error("decision output is not valid JSON ({source}): {raw}")]
    InvalidJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("decision output is JSON but not an object: {raw}")]
    NotAnObject { raw: String },
}

impl NormalizeError {
    /// The offending text, for diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            NormalizeError::NoJsonObject { raw }
            | NormalizeError::InvalidJson { raw, .. }
            | NormalizeError::NotAnObject { raw } => raw,
        }
    }
}

/// Failures of the worker channel itself. A worker that answers with
/// `status: "error"` is not a `WorkerError`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed worker response ({source}): {line}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("worker closed its output channel")]
    Closed,

    #[error("worker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("worker is not running")]
    NotRunning,
}

/// Failures talking to the decision service.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("{0} is not set in environment")]
    MissingCredential(&'static str),

    #[error("rate limited by decision service: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("decision service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("decision service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decision service returned no content: {0}")]
    EmptyResponse(String),
}

impl DecisionError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DecisionError::RateLimited { .. })
    }
}

/// Reasons a run stops abnormally.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to parse decision: {0}")]
    Parse(#[from] NormalizeError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("operator input failed: {0}")]
    Operator(#[source] std::io::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
