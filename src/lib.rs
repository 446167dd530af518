//! colstore: typed, append-optimized columnar table store
//!
//! Tables are groups of equal-length, independently stored column arrays
//! inside a single compressed container file. Columns have fixed physical
//! encodings (int64, float64, fixed-width text, serialized objects) and rows
//! are appended to every column of a table at once.

pub mod data;
pub mod query;
pub mod storage;
pub mod store;
pub mod table;

// Re-export main types
pub use data::codec::{self, CodecError};
pub use data::{ColumnData, ElementDescr, NdArray, Representation, TypedArray, Value};
pub use query::{Clause, CompareOp, Condition, Literal, Query};
pub use storage::{ArrayBackend, Compression, ContainerFile, OpenMode};
pub use store::{ColStore, StoreOptions};
pub use table::{ColumnDtype, ColumnIter, ColumnTable, ReadOptions, RowSelection, TableInfo};

use std::fmt;

/// Kind of node an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Table,
    Column,
    File,
    Node,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Table => "table",
            NodeKind::Column => "column",
            NodeKind::File => "file",
            NodeKind::Node => "node",
        };
        f.write_str(s)
    }
}

/// Caller input rejected before any I/O was issued
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("column lengths differ: column {column} has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("not all columns of {table} given in column data, missing: {missing:?}")]
    MissingColumn { table: String, missing: Vec<String> },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid column dtype: {0}")]
    InvalidDtype(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum ColStoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {name} in {file}")]
    NotFound {
        kind: NodeKind,
        name: String,
        file: String,
    },

    #[error("{kind} already exists: {name} in {file}")]
    AlreadyExists {
        kind: NodeKind,
        name: String,
        file: String,
    },

    #[error("serialized length {len} exceeds width {width} of column {column} in {file}")]
    Overflow {
        column: String,
        len: usize,
        width: usize,
        file: String,
    },

    #[error("row index {index} out of range for table with {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("corruption risk: {0}")]
    CorruptionRisk(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl ColStoreError {
    pub(crate) fn not_found(
        kind: NodeKind,
        name: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        ColStoreError::NotFound {
            kind,
            name: name.into(),
            file: file.into(),
        }
    }

    /// True for `NotFound` errors of any node kind
    pub fn is_not_found(&self) -> bool {
        matches!(self, ColStoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ColStoreError>;
