use thiserror::Error;

use crate::core::outline::OutlinePhase;

/// Failures that end a pass or a drafting run.
///
/// Transient failures (transport errors, `RETRY` replies, shape mismatches)
/// never appear here directly; they are retried by the orchestrator and only
/// surface as [`PipelineError::ValidationFailureExhausted`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{pass} requires outline phase {required}, but the outline is at {current}")]
    PhaseGuardViolation {
        pass: &'static str,
        required: OutlinePhase,
        current: OutlinePhase,
    },
    #[error("{pass} gave up after {attempts} attempts: {last_error}")]
    ValidationFailureExhausted {
        pass: String,
        attempts: u32,
        last_error: String,
    },
    #[error("outline state is malformed: {0}")]
    MalformedPersistedState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Why a single reply was rejected by a shape contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("reply is empty")]
    EmptyReply,
    #[error("no JSON array or object found in reply")]
    NoJsonFound,
    #[error("reply is not the expected JSON shape: {0}")]
    Malformed(String),
    #[error("expected {expected} entries, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("missing key `{0}`")]
    MissingKey(String),
    #[error("reply has {words} words, allowed range is {min}..={max}")]
    WordCount { words: usize, min: usize, max: usize },
    #[error("thread {0} never changes across acts")]
    StaticThread(String),
}

/// Outcome of one failed attempt inside the retry orchestrator.
#[derive(Debug)]
pub enum AttemptError {
    /// Retried with backoff while the budget lasts.
    Transient(TransientFailure),
    /// Aborts the loop immediately.
    Fatal(PipelineError),
}

#[derive(Debug, Error)]
pub enum TransientFailure {
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    #[error("model replied RETRY")]
    RetrySentinel,
    #[error("shape mismatch: {0}")]
    Shape(#[from] ShapeError),
}

impl From<TransientFailure> for AttemptError {
    fn from(failure: TransientFailure) -> Self {
        AttemptError::Transient(failure)
    }
}

impl From<PipelineError> for AttemptError {
    fn from(err: PipelineError) -> Self {
        AttemptError::Fatal(err)
    }
}
