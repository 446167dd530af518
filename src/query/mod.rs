//! Row predicates
//!
//! [`Query`] is the caller-facing AND-of-ORs predicate model;
//! [`CompiledPredicate`] evaluates it as vectorized masks over column buffers.

mod compiled;
mod filter;

pub use compiled::{ColumnBuffer, CompiledPredicate, PARALLEL_THRESHOLD};
pub use filter::{Clause, CompareOp, Condition, Literal, Query};
