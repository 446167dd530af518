//! Vectorized predicate evaluation over column buffers
//!
//! A [`Query`] compiles into a list of clauses over a slot table: every
//! referenced column is loaded once into a [`ColumnBuffer`] and each term is
//! bound to its slot with a literal of the buffer's element type. Evaluation
//! builds one boolean mask per term, ORs terms within a clause and ANDs the
//! clauses.

use ahash::AHashMap;
use rayon::prelude::*;

use super::filter::{CompareOp, Literal, Query};
use crate::{ColStoreError, Result, ValidationError};

/// Buffers at least this long are masked in parallel
pub const PARALLEL_THRESHOLD: usize = 50_000;

/// In-memory contents of one queried column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnBuffer {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    /// Raw UTF-8 bytes of text cells
    Text(Vec<Vec<u8>>),
}

impl ColumnBuffer {
    pub fn len(&self) -> usize {
        match self {
            ColumnBuffer::Int64(v) => v.len(),
            ColumnBuffer::Float64(v) => v.len(),
            ColumnBuffer::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Literal bound to a buffer type
#[derive(Debug, Clone)]
enum Target {
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Term {
    slot: usize,
    op: CompareOp,
    target: Target,
}

/// A query bound to loaded column buffers
#[derive(Debug)]
pub struct CompiledPredicate {
    buffers: Vec<ColumnBuffer>,
    clauses: Vec<Vec<Term>>,
    nrows: usize,
}

impl CompiledPredicate {
    /// Compile `query` for a table of `nrows` rows
    ///
    /// `load` is called once per referenced column.
    pub fn compile<F>(query: &Query, nrows: usize, mut load: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<ColumnBuffer>,
    {
        let mut slots: AHashMap<&str, usize> = AHashMap::new();
        let mut buffers = Vec::new();
        let mut clauses = Vec::with_capacity(query.clauses().len());

        for clause in query.clauses() {
            let conditions = clause.conditions();
            if conditions.is_empty() {
                return Err(ValidationError::InvalidQuery("empty OR clause".into()).into());
            }
            let mut terms = Vec::with_capacity(conditions.len());
            for cond in conditions {
                let slot = match slots.get(cond.column.as_str()) {
                    Some(&slot) => slot,
                    None => {
                        let buffer = load(cond.column.as_str())?;
                        if buffer.len() != nrows {
                            return Err(ColStoreError::CorruptionRisk(format!(
                                "column {} has {} rows, table has {}",
                                cond.column,
                                buffer.len(),
                                nrows
                            )));
                        }
                        buffers.push(buffer);
                        slots.insert(cond.column.as_str(), buffers.len() - 1);
                        buffers.len() - 1
                    }
                };
                let target = bind(&buffers[slot], &cond.value).ok_or_else(|| {
                    ValidationError::InvalidQuery(format!(
                        "cannot compare column {} with {}",
                        cond.column, cond.value
                    ))
                })?;
                terms.push(Term { slot, op: cond.op, target });
            }
            clauses.push(terms);
        }

        Ok(Self { buffers, clauses, nrows })
    }

    /// Ascending positions of matching rows
    pub fn evaluate(&self) -> Vec<usize> {
        if self.clauses.is_empty() || self.nrows == 0 {
            return Vec::new();
        }

        let mut mask: Option<Vec<bool>> = None;
        for clause in &self.clauses {
            let mut clause_mask: Option<Vec<bool>> = None;
            for term in clause {
                let term_mask = self.term_mask(term);
                clause_mask = Some(match clause_mask {
                    None => term_mask,
                    Some(acc) => combine(acc, &term_mask, |a, b| a || b),
                });
            }
            if let Some(clause_mask) = clause_mask {
                mask = Some(match mask {
                    None => clause_mask,
                    Some(acc) => combine(acc, &clause_mask, |a, b| a && b),
                });
            }
        }

        mask.map(|m| {
            m.iter()
                .enumerate()
                .filter_map(|(i, &hit)| hit.then_some(i))
                .collect()
        })
        .unwrap_or_default()
    }

    fn term_mask(&self, term: &Term) -> Vec<bool> {
        let op = term.op;
        match (&self.buffers[term.slot], &term.target) {
            (ColumnBuffer::Int64(data), Target::Int(t)) => mask_of(data, |v| op.apply(v, t)),
            (ColumnBuffer::Int64(data), Target::Float(t)) => {
                mask_of(data, |v| op.apply(&(*v as f64), t))
            }
            (ColumnBuffer::Float64(data), Target::Float(t)) => mask_of(data, |v| op.apply(v, t)),
            (ColumnBuffer::Text(data), Target::Bytes(t)) => {
                mask_of(data, |v| op.apply(v.as_slice(), t.as_slice()))
            }
            _ => vec![false; self.nrows],
        }
    }
}

/// Bind a literal to the element type of a buffer
fn bind(buffer: &ColumnBuffer, literal: &Literal) -> Option<Target> {
    match (buffer, literal) {
        (ColumnBuffer::Int64(_), Literal::Int(v)) => Some(Target::Int(*v)),
        (ColumnBuffer::Int64(_), Literal::Float(v)) => Some(Target::Float(*v)),
        (ColumnBuffer::Float64(_), Literal::Int(v)) => Some(Target::Float(*v as f64)),
        (ColumnBuffer::Float64(_), Literal::Float(v)) => Some(Target::Float(*v)),
        (ColumnBuffer::Text(_), Literal::Text(s)) => Some(Target::Bytes(s.as_bytes().to_vec())),
        _ => None,
    }
}

fn mask_of<T, F>(data: &[T], f: F) -> Vec<bool>
where
    T: Sync,
    F: Fn(&T) -> bool + Sync + Send,
{
    if data.len() >= PARALLEL_THRESHOLD {
        data.par_iter().map(f).collect()
    } else {
        data.iter().map(f).collect()
    }
}

fn combine(mut acc: Vec<bool>, other: &[bool], f: fn(bool, bool) -> bool) -> Vec<bool> {
    if acc.len() >= PARALLEL_THRESHOLD {
        acc.par_iter_mut().zip(other.par_iter()).for_each(|(a, b)| *a = f(*a, *b));
    } else {
        acc.iter_mut().zip(other).for_each(|(a, b)| *a = f(*a, *b));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Condition;

    fn table() -> AHashMap<&'static str, ColumnBuffer> {
        let mut cols = AHashMap::new();
        cols.insert("col1", ColumnBuffer::Int64((0..10).collect()));
        cols.insert(
            "col2",
            ColumnBuffer::Text(
                ["a", "a", "c", "d", "e", "f", "g", "g", "f", "c"]
                    .iter()
                    .map(|s| s.as_bytes().to_vec())
                    .collect(),
            ),
        );
        cols.insert("col3", ColumnBuffer::Float64((0..10).map(|i| i as f64 / 2.0).collect()));
        cols
    }

    fn run(query: &Query) -> Result<Vec<usize>> {
        let cols = table();
        let mut loads = Vec::new();
        let pred = CompiledPredicate::compile(query, 10, |name| {
            loads.push(name.to_string());
            cols.get(name)
                .cloned()
                .ok_or_else(|| ColStoreError::not_found(crate::NodeKind::Column, name, "mem"))
        })?;
        let mut sorted = loads.clone();
        sorted.dedup();
        assert_eq!(sorted, loads, "column loaded twice");
        Ok(pred.evaluate())
    }

    #[test]
    fn test_or_clause() {
        let q = Query::new().or_any(vec![
            Condition::new("col1", CompareOp::GreaterThan, 7),
            Condition::new("col1", CompareOp::LessEqual, 3),
        ]);
        assert_eq!(run(&q).unwrap(), vec![0, 1, 2, 3, 8, 9]);
    }

    #[test]
    fn test_and_of_clauses() {
        let q = Query::new()
            .and(Condition::new("col2", CompareOp::Equal, "g"))
            .or_any(vec![
                Condition::new("col1", CompareOp::Equal, 7),
                Condition::new("col3", CompareOp::LessThan, 1.0),
            ]);
        assert_eq!(run(&q).unwrap(), vec![7]);

        let q = Query::from(Condition::new("col2", CompareOp::GreaterEqual, "f"));
        assert_eq!(run(&q).unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_mixed_numeric_literals() {
        let q = Query::from(Condition::new("col1", CompareOp::LessThan, 2.5));
        assert_eq!(run(&q).unwrap(), vec![0, 1, 2]);
        let q = Query::from(Condition::new("col3", CompareOp::Equal, 2));
        assert_eq!(run(&q).unwrap(), vec![4]);
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        assert!(run(&Query::new()).unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch_and_missing_column() {
        let q = Query::from(Condition::new("col1", CompareOp::Equal, "a"));
        assert!(matches!(
            run(&q),
            Err(ColStoreError::Validation(ValidationError::InvalidQuery(_)))
        ));
        let q = Query::from(Condition::new("nope", CompareOp::Equal, 1));
        assert!(run(&q).unwrap_err().is_not_found());
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let n = PARALLEL_THRESHOLD + 17;
        let data: Vec<i64> = (0..n as i64).collect();
        let q = Query::new()
            .and(Condition::new("x", CompareOp::GreaterEqual, 10))
            .or_any(vec![
                Condition::new("x", CompareOp::LessThan, 20),
                Condition::new("x", CompareOp::Equal, (n - 1) as i64),
            ]);
        let pred =
            CompiledPredicate::compile(&q, n, |_| Ok(ColumnBuffer::Int64(data.clone()))).unwrap();
        let mut expected: Vec<usize> = (10..20).collect();
        expected.push(n - 1);
        assert_eq!(pred.evaluate(), expected);
    }
}
