//! Data types: structured values, numeric arrays and column payloads

pub mod codec;
mod column;
mod value;

pub use column::{ColumnData, Representation, TypedArray};
pub use value::{ElementDescr, NdArray, Value, F64_DESCR, I64_DESCR};
