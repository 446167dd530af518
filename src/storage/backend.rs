//! Array backend seam
//!
//! Everything the table engine needs from physical storage: typed growable
//! arrays addressed by path, positional reads and writes, truncation, node
//! rename/removal, attribute blobs, and whole-file copies.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::header::Compression;
use crate::Result;

// ============================================================================
// Array element types
// ============================================================================

/// Physical element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atom {
    Int64,
    Float64,
    /// Fixed-width byte string. Cells are zero padded on write and lose
    /// trailing zero bytes on read.
    FixedBytes(usize),
}

impl Atom {
    /// Width of one element in bytes
    pub fn item_size(&self) -> usize {
        match self {
            Atom::Int64 | Atom::Float64 => 8,
            Atom::FixedBytes(w) => *w,
        }
    }
}

/// Creation parameters of an array node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    pub atom: Atom,
    /// Shape of one row, empty for scalar rows. Only numeric atoms may have
    /// a non-empty row shape.
    pub inner_shape: Vec<usize>,
    /// Expected rows per chunk, a sizing hint
    pub chunk_rows: usize,
}

impl ArraySpec {
    pub fn new(atom: Atom) -> Self {
        Self {
            atom,
            inner_shape: Vec::new(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }

    pub fn with_inner_shape(mut self, inner_shape: Vec<usize>) -> Self {
        self.inner_shape = inner_shape;
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    /// Number of elements in one row
    pub fn row_width(&self) -> usize {
        self.inner_shape.iter().product()
    }
}

/// Default expected rows per chunk
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

// ============================================================================
// Cell buffers
// ============================================================================

/// A batch of array elements, row-major
///
/// For numeric arrays with an inner shape the buffer holds
/// `rows * row_width` elements. Byte cells are one per row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cells {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Bytes(Vec<Vec<u8>>),
}

impl Cells {
    /// Number of elements (not rows)
    pub fn len(&self) -> usize {
        match self {
            Cells::Int64(v) => v.len(),
            Cells::Float64(v) => v.len(),
            Cells::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows given the row width of the target array
    pub fn rows(&self, row_width: usize) -> usize {
        match self {
            Cells::Bytes(v) => v.len(),
            _ if row_width == 0 => 0,
            _ => self.len() / row_width,
        }
    }

    /// Empty buffer matching an atom
    pub fn empty_for(atom: Atom) -> Self {
        match atom {
            Atom::Int64 => Cells::Int64(Vec::new()),
            Atom::Float64 => Cells::Float64(Vec::new()),
            Atom::FixedBytes(_) => Cells::Bytes(Vec::new()),
        }
    }

    /// Check the buffer's element type against an atom
    pub fn matches_atom(&self, atom: Atom) -> bool {
        matches!(
            (self, atom),
            (Cells::Int64(_), Atom::Int64)
                | (Cells::Float64(_), Atom::Float64)
                | (Cells::Bytes(_), Atom::FixedBytes(_))
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Cells::Int64(_) => "int64",
            Cells::Float64(_) => "float64",
            Cells::Bytes(_) => "bytes",
        }
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Chunked array file operations consumed by the table engine
///
/// Paths are absolute node paths (`/table/column`). Row positions index
/// whole rows; multi-dimensional rows move as a unit.
pub trait ArrayBackend {
    /// Human readable location used in error messages
    fn location(&self) -> &str;

    /// Create a group node and any missing parents. Existing groups are kept.
    fn create_group(&mut self, path: &str) -> Result<()>;

    /// Create an empty growable array, creating missing parent groups
    fn create_array(&mut self, path: &str, spec: ArraySpec) -> Result<()>;

    /// Spec of an array node, `None` when the path is not an array
    fn array_spec(&self, path: &str) -> Option<ArraySpec>;

    /// Number of rows of an array
    fn array_len(&self, path: &str) -> Result<usize>;

    /// Append rows to the end of an array
    fn append(&mut self, path: &str, cells: &Cells) -> Result<()>;

    /// Read rows at `positions` (in the given order), or every row for `None`
    fn read_rows(&self, path: &str, positions: Option<&[usize]>) -> Result<Cells>;

    /// Overwrite rows at `positions`; `cells` holds one row per position
    fn write_rows(&mut self, path: &str, positions: &[usize], cells: &Cells) -> Result<()>;

    /// Shrink an array to `len` rows
    fn truncate(&mut self, path: &str, len: usize) -> Result<()>;

    fn node_exists(&self, path: &str) -> bool;

    /// Names of the direct children of a group
    fn list_children(&self, path: &str) -> Result<Vec<String>>;

    fn get_attr(&self, node: &str, key: &str) -> Result<Option<Vec<u8>>>;

    fn set_attr(&mut self, node: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a node; groups with children need `recursive`
    fn remove_node(&mut self, path: &str, recursive: bool) -> Result<()>;

    /// Move a node (and its subtree) to a new absolute path
    fn rename_node(&mut self, old_path: &str, new_path: &str) -> Result<()>;

    /// Write a full copy of the file to `dest` with the given compression
    fn copy_file(&self, dest: &Path, compression: Compression) -> Result<()>;

    /// Size of the backing file in bytes
    fn file_size(&self) -> Result<u64>;
}
