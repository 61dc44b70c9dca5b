//! Error taxonomy for interpretation, reading, training and persistence

use thiserror::Error;

/// Failures while lexing, parsing or building a specification.
///
/// Every variant aborts the whole `eval` call; no binding from the failed
/// text is left behind in the environment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("line {line}: {message}")]
    Lex { line: usize, message: String },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("member \"{member}\": expected {expected} but got {got}")]
    TypeMismatch {
        member: String,
        expected: String,
        got: String,
    },

    #[error("line {line}: variable \"{name}\" refers to itself while being defined")]
    CyclicSpec { name: String, line: usize },

    #[error("line {line}: unknown factory or unbound variable \"{name}\"")]
    UnknownFactory { name: String, line: usize },

    #[error("line {line}: {factory} has no member named \"{member}\"")]
    UnknownMember {
        factory: String,
        member: String,
        line: usize,
    },

    #[error("line {line}: parameter \"{member}\" of {factory} given more than once")]
    DuplicateParameter {
        factory: String,
        member: String,
        line: usize,
    },

    #[error("{factory}: required member \"{member}\" was not initialized")]
    MissingMember { factory: String, member: String },

    #[error("line {line}: variable \"{name}\" is already bound")]
    Rebind { name: String, line: usize },

    #[error("factory \"{name}\" registered twice")]
    DuplicateFactory { name: String },

    #[error("{factory}: {message}")]
    InvalidConfiguration { factory: String, message: String },

    #[error("specification produced {got}, not a component")]
    NotAComponent { got: String },
}

/// Reader-local failures. Whether to skip or abort is the caller's call.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("record at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TrainError {
    /// An upstream reader produced a set with no candidates at all.
    #[error("candidate set \"{key}\" has no candidates (absolute index {absolute_index})")]
    EmptyCandidateSet { key: String, absolute_index: u64 },

    #[error(transparent)]
    Read(#[from] ReadError),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed model state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not rebuild model from its spec: {0}")]
    Spec(#[from] SpecError),

    #[error("{0}")]
    Format(String),
}
