//! Table management module
//!
//! A table is a group of equal-length column arrays plus a metadata
//! attribute with the column dtypes and representations.

pub mod column_table;
mod compaction;
mod convert;
pub mod schema;

pub use column_table::{ColumnMap, ColumnTable};
pub use convert::ColumnIter;
pub use schema::{infer_dtype, ColumnDtype, TableInfo, TableMeta, FORMAT_VERSION, META_ATTR};

use crate::data::Representation;
use crate::query::Query;

/// Row and column selection for a table read
///
/// Explicit row indices take precedence over a query.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub columns: Option<Vec<String>>,
    pub query: Option<Query>,
    pub row_indices: Option<Vec<usize>>,
    pub representation: Option<Representation>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn rows(mut self, rows: Vec<usize>) -> Self {
        self.row_indices = Some(rows);
        self
    }

    pub fn representation(mut self, representation: Representation) -> Self {
        self.representation = Some(representation);
        self
    }
}

/// Rows targeted by a delete
#[derive(Debug, Clone, PartialEq)]
pub enum RowSelection {
    Query(Query),
    Rows(Vec<usize>),
}

impl From<Query> for RowSelection {
    fn from(query: Query) -> Self {
        RowSelection::Query(query)
    }
}

impl From<Vec<usize>> for RowSelection {
    fn from(rows: Vec<usize>) -> Self {
        RowSelection::Rows(rows)
    }
}
