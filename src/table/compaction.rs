//! Row removal by tail relocation
//!
//! Removing `k` rows from an `N` row array moves at most `k` rows: every
//! vacated slot below `N - k` is refilled from a surviving tail row, then the
//! array is truncated. Surviving rows do not keep their relative order.

use std::collections::BTreeSet;

use crate::{ColStoreError, Result};

/// Row moves and final length for one removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompactionPlan {
    /// `(source, destination)` row pairs, ascending on both sides
    pub moves: Vec<(usize, usize)>,
    pub new_len: usize,
}

impl CompactionPlan {
    pub fn sources(&self) -> Vec<usize> {
        self.moves.iter().map(|(s, _)| *s).collect()
    }

    pub fn destinations(&self) -> Vec<usize> {
        self.moves.iter().map(|(_, d)| *d).collect()
    }
}

/// Plan the removal of `rows` (any order, duplicates allowed) from `len` rows
pub(crate) fn plan_removal(len: usize, rows: &[usize]) -> Result<CompactionPlan> {
    let removed: BTreeSet<usize> = rows.iter().copied().collect();
    if let Some(&bad) = removed.iter().next_back().filter(|&&r| r >= len) {
        return Err(ColStoreError::IndexOutOfRange { index: bad, len });
    }

    let last = len - removed.len();
    let vacated: Vec<usize> = removed.range(..last).copied().collect();
    let sources: Vec<usize> = (last..len).filter(|r| !removed.contains(r)).collect();

    if vacated.len() != sources.len() {
        return Err(ColStoreError::CorruptionRisk(format!(
            "{} vacated rows but {} replacement rows while removing {} of {} rows",
            vacated.len(),
            sources.len(),
            removed.len(),
            len
        )));
    }

    Ok(CompactionPlan {
        moves: sources.into_iter().zip(vacated).collect(),
        new_len: last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(data: &[i64], plan: &CompactionPlan) -> Vec<i64> {
        let mut out = data.to_vec();
        for &(src, dst) in &plan.moves {
            out[dst] = out[src];
        }
        out.truncate(plan.new_len);
        out
    }

    #[test]
    fn test_fill_from_tail() {
        let data: Vec<i64> = (0..10).collect();
        let plan = plan_removal(10, &[6, 2, 5, 2]).unwrap();
        assert_eq!(plan.moves, vec![(7, 2), (8, 5), (9, 6)]);
        assert_eq!(apply(&data, &plan), vec![0, 1, 7, 3, 4, 8, 9]);
    }

    #[test]
    fn test_tail_rows_need_no_move() {
        let plan = plan_removal(5, &[2, 3]).unwrap();
        assert_eq!(plan.moves, vec![(4, 2)]);
        assert_eq!(plan.new_len, 3);

        let plan = plan_removal(5, &[3, 4]).unwrap();
        assert!(plan.moves.is_empty());
        assert_eq!(plan.new_len, 3);
    }

    #[test]
    fn test_moves_bounded_by_removed() {
        for len in 0..12usize {
            for mask in 0u32..(1 << len) {
                let rows: Vec<usize> = (0..len).filter(|i| mask & (1 << i) != 0).collect();
                let plan = plan_removal(len, &rows).unwrap();
                assert!(plan.moves.len() <= rows.len());
                assert_eq!(plan.new_len, len - rows.len());

                let data: Vec<i64> = (0..len as i64).collect();
                let mut kept = apply(&data, &plan);
                kept.sort_unstable();
                let expected: Vec<i64> =
                    (0..len as i64).filter(|i| !rows.contains(&(*i as usize))).collect();
                assert_eq!(kept, expected);
            }
        }
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            plan_removal(3, &[1, 3]),
            Err(ColStoreError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }
}
