//! Schema and encoding descriptions as KDL documents.
//!
//! A document holds one component tree (its root node is `record`, `array`, `list`, `scalar`
//! or `range`) followed by any number of `encoding` nodes:
//!
//! ```kdl
//! record "weather" {
//!     scalar "time" type="f64"
//!     scalar "num_bins" type="i32"
//!     array "bins" count="num_bins" { scalar "val" type="f64" }
//! }
//! encoding "text" token_separator="," block_separator="\n"
//! encoding "binary" byte_order="little" {
//!     component "num_bins" type="u16"
//! }
//! ```

use std::path::{Path, PathBuf};

use miette::{Diagnostic, SourceSpan};
use swe_common::{Component, DataEncoding};
use thiserror::Error;

mod ser;
pub use ser::*;

mod de;
pub use de::*;

pub mod env;

#[derive(Error, Debug, Diagnostic)]
pub enum KdlSchemaError {
    #[error("KDL parse error")]
    #[diagnostic(code(swe_kdl::parse_error))]
    ParseError {
        #[source]
        source: kdl::KdlError,
        #[source_code]
        src: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("Missing required property '{property}' on node '{node}'")]
    #[diagnostic(code(swe_kdl::missing_property))]
    MissingProperty {
        property: String,
        node: String,
        #[source_code]
        src: String,
        #[label("this node is missing the property")]
        span: SourceSpan,
    },

    #[error("Invalid value for property '{property}' on node '{node}': expected {expected}")]
    #[diagnostic(code(swe_kdl::invalid_value))]
    InvalidValue {
        property: String,
        node: String,
        expected: String,
        #[source_code]
        src: String,
        #[label("invalid value here")]
        span: SourceSpan,
    },

    #[error("Unknown node type '{node_type}'")]
    #[diagnostic(code(swe_kdl::unknown_node))]
    UnknownNode {
        node_type: String,
        #[source_code]
        src: String,
        #[label("unknown node")]
        span: SourceSpan,
    },

    #[error("'{node}' takes exactly one element node, found {found}")]
    #[diagnostic(code(swe_kdl::element_count))]
    ElementCount {
        node: String,
        found: usize,
        #[source_code]
        src: String,
        #[label("expected one child")]
        span: SourceSpan,
    },

    #[error("Document has no component tree")]
    #[diagnostic(
        code(swe_kdl::missing_root),
        help("add a `record`, `array`, `list`, `scalar` or `range` node")
    )]
    MissingRoot {
        #[source_code]
        src: String,
    },

    #[error("Document has more than one component tree")]
    #[diagnostic(code(swe_kdl::duplicate_root))]
    DuplicateRoot {
        #[source_code]
        src: String,
        #[label("second root")]
        span: SourceSpan,
    },

    #[error("Invalid schema")]
    #[diagnostic(code(swe_kdl::invalid_schema))]
    InvalidSchema {
        #[source]
        #[diagnostic_source]
        source: swe_common::Error,
        #[source_code]
        src: String,
        #[label("in this component")]
        span: SourceSpan,
    },

    #[error("Invalid encoding")]
    #[diagnostic(code(swe_kdl::invalid_encoding))]
    InvalidEncoding {
        #[source]
        #[diagnostic_source]
        source: swe_common::Error,
        #[source_code]
        src: String,
        #[label("in this encoding")]
        span: SourceSpan,
    },

    #[error("Cannot read {path:?}")]
    #[diagnostic(code(swe_kdl::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait ToKdl {
    fn to_kdl(&self) -> String;
}

pub trait FromKdl {
    fn from_kdl(src: &str) -> Result<Self, KdlSchemaError>
    where
        Self: Sized;
}

impl ToKdl for Component {
    fn to_kdl(&self) -> String {
        serialize_document(self, &[])
    }
}

impl FromKdl for Component {
    fn from_kdl(src: &str) -> Result<Self, KdlSchemaError>
    where
        Self: Sized,
    {
        parse_document(src).map(|(schema, _)| schema)
    }
}

/// Reads and parses a document, resolving relative paths with [`env::schema_file`].
pub fn read_document(path: &Path) -> Result<(Component, Vec<DataEncoding>), KdlSchemaError> {
    let path = env::schema_file(path);
    let src = std::fs::read_to_string(&path).map_err(|source| KdlSchemaError::Io {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "schema document loaded");
    parse_document(&src)
}
