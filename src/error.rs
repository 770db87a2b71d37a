//! attncheck error types

use crate::format::gguf::GgmlType;

/// attncheck result type
pub type Result<T> = std::result::Result<T, Error>;

/// attncheck errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure while reading a vocabulary or config file
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Element type that a code path cannot handle
    #[error("unsupported element type {ty:?} in {context}")]
    UnsupportedType {
        /// Offending element type
        ty: GgmlType,
        /// Where it was encountered
        context: &'static str,
    },

    /// Buffer or graph allocation failure
    #[error("allocation error: {reason}")]
    AllocError {
        /// Description of what went wrong
        reason: String,
    },

    /// Backend failed to execute a node or serve a buffer
    #[error("backend '{backend}' error: {reason}")]
    BackendError {
        /// Backend name
        backend: String,
        /// Description of what went wrong
        reason: String,
    },

    /// Graph construction or traversal error
    #[error("graph error: {reason}")]
    GraphError {
        /// Description of what went wrong
        reason: String,
    },

    /// GGUF / vocabulary loading error
    #[error("vocab error: {reason}")]
    VocabError {
        /// Description of what went wrong
        reason: String,
    },

    /// Harness configuration error
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },

    /// A vocabulary id that does not survive detokenize -> tokenize
    #[error("token {id} ('{piece}') tokenizes to {got:?}")]
    RoundTrip {
        /// Token id under test
        id: u32,
        /// Display text of the token
        piece: String,
        /// Ids produced by tokenizing the piece
        got: Vec<u32>,
    },
}

impl Error {
    pub(crate) fn backend(backend: &str, reason: impl Into<String>) -> Self {
        Error::BackendError {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn graph(reason: impl Into<String>) -> Self {
        Error::GraphError {
            reason: reason.into(),
        }
    }
}
