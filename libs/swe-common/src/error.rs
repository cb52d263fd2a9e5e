use core::fmt;

use thiserror::Error;

use crate::{codec::StreamState, types::DataType};

/// Broad class of an [`Error`], used by error handlers to decide whether a
/// stream can keep going.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    Resize,
    TokenFormat,
    BinaryFormat,
    TypeMismatch,
    StreamIo,
    UnknownCluster,
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Schema => "schema error",
            ErrorKind::Resize => "resize error",
            ErrorKind::TokenFormat => "token format error",
            ErrorKind::BinaryFormat => "binary format error",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::StreamIo => "stream i/o failure",
            ErrorKind::UnknownCluster => "unknown cluster",
            ErrorKind::InvalidState => "invalid state",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, miette::Diagnostic)]
pub enum Error {
    #[error("duplicate component name `{name}` in `{parent}`")]
    #[diagnostic(
        code(swe::duplicate_name),
        help("names must be unique among the fields of a record")
    )]
    DuplicateName { parent: String, name: String },

    #[error("invalid path `{path}`: {reason}")]
    #[diagnostic(code(swe::invalid_path))]
    InvalidPath { path: String, reason: String },

    #[error("count of `{array}` references `{counter}` which is not resolved")]
    #[diagnostic(
        code(swe::unresolved_count),
        help("the counter must be an integer scalar declared before the array")
    )]
    UnresolvedCount { array: String, counter: String },

    #[error("invalid schema at `{path}`: {reason}")]
    #[diagnostic(code(swe::invalid_schema))]
    InvalidSchema { path: String, reason: String },

    #[error("invalid encoding: {0}")]
    #[diagnostic(code(swe::invalid_encoding))]
    InvalidEncoding(String),

    #[error("atom index {index} out of bounds for block of {count} atoms")]
    #[diagnostic(code(swe::atom_out_of_bounds))]
    AtomOutOfBounds { index: usize, count: usize },

    #[error("`{path}` holds {actual} elements but its counter says {counter}")]
    #[diagnostic(
        code(swe::count_mismatch),
        help("call `apply_counts` after setting a counter directly")
    )]
    CountMismatch {
        path: String,
        counter: i64,
        actual: usize,
    },

    #[error("block does not match the shape of `{path}`")]
    #[diagnostic(code(swe::shape_mismatch))]
    ShapeMismatch { path: String },

    #[error("negative size {size} for `{path}`")]
    #[diagnostic(code(swe::negative_size))]
    NegativeSize { path: String, size: i64 },

    #[error("`{path}` has a fixed size")]
    #[diagnostic(
        code(swe::fixed_size),
        help("only arrays with a counter reference and lists can be resized")
    )]
    FixedSize { path: String },

    #[error("cannot shrink `{path}` to {size}, minimum is {min}")]
    #[diagnostic(
        code(swe::shrink_below_minimum),
        help("lists are append-only")
    )]
    ShrinkBelowMinimum {
        path: String,
        size: usize,
        min: usize,
    },

    #[error("size {size} of `{path}` exceeds the limit of {max}")]
    #[diagnostic(code(swe::count_overflow))]
    CountOverflow {
        path: String,
        size: usize,
        max: usize,
    },

    #[error("invalid token `{token}` at `{path}`: expected {expected}")]
    #[diagnostic(code(swe::token_format))]
    TokenFormat {
        path: String,
        token: String,
        expected: String,
    },

    #[error("undecodable value at `{path}`: {detail}")]
    #[diagnostic(code(swe::binary_format))]
    BinaryFormat { path: String, detail: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    #[diagnostic(code(swe::type_mismatch))]
    TypeMismatch { expected: String, found: DataType },

    #[error("io {0}")]
    #[diagnostic(code(swe::io))]
    Io(#[from] std::io::Error),

    #[error("unknown cluster `{0}`")]
    #[diagnostic(
        code(swe::unknown_cluster),
        help("register a parser for this cluster with `add_data_parser`")
    )]
    UnknownCluster(String),

    #[error("cannot {op} while {state}")]
    #[diagnostic(code(swe::invalid_state))]
    InvalidState { op: &'static str, state: StreamState },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateName { .. }
            | Error::InvalidPath { .. }
            | Error::UnresolvedCount { .. }
            | Error::InvalidSchema { .. }
            | Error::InvalidEncoding(_)
            | Error::AtomOutOfBounds { .. }
            | Error::CountMismatch { .. }
            | Error::ShapeMismatch { .. } => ErrorKind::Schema,
            Error::NegativeSize { .. }
            | Error::FixedSize { .. }
            | Error::ShrinkBelowMinimum { .. }
            | Error::CountOverflow { .. } => ErrorKind::Resize,
            Error::TokenFormat { .. } => ErrorKind::TokenFormat,
            Error::BinaryFormat { .. } => ErrorKind::BinaryFormat,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::Io(_) => ErrorKind::StreamIo,
            Error::UnknownCluster(_) => ErrorKind::UnknownCluster,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// Component path the error refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::InvalidPath { path, .. }
            | Error::InvalidSchema { path, .. }
            | Error::CountMismatch { path, .. }
            | Error::ShapeMismatch { path }
            | Error::NegativeSize { path, .. }
            | Error::FixedSize { path }
            | Error::ShrinkBelowMinimum { path, .. }
            | Error::CountOverflow { path, .. }
            | Error::TokenFormat { path, .. }
            | Error::BinaryFormat { path, .. } => Some(path),
            Error::UnresolvedCount { array, .. } => Some(array),
            Error::DuplicateName { parent, .. } => Some(parent),
            _ => None,
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, found: DataType) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            found,
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Errors after which the input cannot be read any further.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::StreamIo | ErrorKind::InvalidState)
    }
}
