//! Typed failures. Located, user-facing problems are `Diagnostic`s instead.

use thiserror::Error;

use crate::span::Span;

/// An edit that the buffer cannot apply consistently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("edit at {new:?} partially overlaps an existing edit at {existing:?}")]
    Overlap { existing: Span, new: Span },

    #[error("edit at {span:?} lies outside the document ({len} bytes)")]
    OutOfBounds { span: Span, len: u32 },
}

/// Fatal failures of the source splitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("{location}: unsupported dispatch call: {reason}")]
    UnsupportedDispatchShape { location: String, reason: String },

    #[error("inconsistent edits: {0}")]
    Edit(#[from] EditError),
}

/// Failures of the IR-to-source backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no registered target named '{name}' (available: {available})")]
    UnknownTarget { name: String, available: String },

    #[error("target '{target}' does not support generation of this file type ({file_type})")]
    UnsupportedFileType { target: String, file_type: String },

    #[error("invalid target triple '{0}'")]
    InvalidTriple(String),

    #[error("no registered pass named '{0}'")]
    UnknownPass(String),

    #[error("module verification failed: {0}")]
    Verify(String),

    #[error("cannot emit '{function}': {reason}")]
    Emit { function: String, reason: String },

    #[error("regeneration step '{step}' attempted in state {state}")]
    OutOfOrder { step: &'static str, state: String },
}

/// Syntax errors in a textual compiled module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct ReadError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Top-level error for the library entry points and the CLI.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("cannot read module: {0}")]
    Read(#[from] ReadError),

    #[error("{0}")]
    Config(String),
}

impl Error {
    /// Internal consistency failures, as opposed to bad input.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Rewrite(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
