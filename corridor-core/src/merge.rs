//! Two-phase union of buffers.
//!
//! Each job unions its own buffers locally; the orchestrator then unions
//! the per-job results. Union is associative and commutative, so any
//! grouping of the same buffers yields the same area up to floating-point
//! tolerance. Inputs are sorted before folding so that a given grouping
//! always produces identical coordinates.

use geo::{BooleanOps, MultiPolygon};

use crate::{FeatureBuffer, geometry};

/// Union a sequence of polygon sets.
///
/// The fold is a balanced pairwise reduction, which keeps intermediate
/// results small. Empty input yields an empty set.
///
/// # Examples
///
/// ```
/// use corridor_core::merge::union_all;
/// use geo::{Area, MultiPolygon, polygon};
///
/// let left = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 0.0, y: 1.0)];
/// let right = polygon![(x: 1.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 1.0), (x: 1.0, y: 1.0)];
/// let merged = union_all(vec![left.into(), right.into()]);
/// assert_eq!(merged.0.len(), 1);
/// assert!((merged.unsigned_area() - 3.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn union_all(parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut level: Vec<MultiPolygon<f64>> = parts.into_iter().filter(|p| !p.0.is_empty()).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(first) = iter.next() {
            match iter.next() {
                Some(second) => next.push(first.union(&second)),
                None => next.push(first),
            }
        }
        level = next;
    }
    level.pop().unwrap_or_else(geometry::empty)
}

/// Local phase: union one job's buffers, consuming them.
///
/// Buffers are ordered by feature identity first, so the same set of
/// buffers always folds in the same order.
#[must_use]
pub fn reduce_local(mut buffers: Vec<FeatureBuffer>) -> MultiPolygon<f64> {
    buffers.sort_by(|a, b| a.id.cmp(&b.id));
    union_all(buffers.into_iter().map(|buffer| buffer.polygon).collect())
}

/// Global phase: union per-job results keyed by job index.
///
/// Results are folded in job order; a failed job simply has no entry.
#[must_use]
pub fn reduce_global(
    job_results: impl IntoIterator<Item = (usize, MultiPolygon<f64>)>,
) -> MultiPolygon<f64> {
    let mut ordered: Vec<_> = job_results.into_iter().collect();
    ordered.sort_by_key(|(index, _)| *index);
    union_all(ordered.into_iter().map(|(_, polygon)| polygon).collect())
}
