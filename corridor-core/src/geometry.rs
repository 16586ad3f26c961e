//! Geometry helpers shared by the buffering, merge and validation stages.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use geo::{Area, BooleanOps, MultiPolygon, Validation};

use crate::merge::union_all;

/// Run a geometry-engine operation, turning a panic into an error message.
pub(crate) fn guard<T>(operation: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(operation)).map_err(|payload| panic_message(&*payload))
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "geometry engine panicked".to_owned())
}

/// An empty multipolygon.
#[must_use]
pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

/// Restore validity by re-noding each member and unioning the members
/// against each other, so overlapping members merge instead of cancelling.
///
/// Returns `None` when the repaired geometry is still invalid.
pub(crate) fn repair(geometry: MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    if geometry.is_valid() {
        return Some(geometry);
    }
    let repaired = guard(|| {
        let members = geometry
            .0
            .into_iter()
            .map(|polygon| MultiPolygon::new(vec![polygon]).union(&empty()))
            .collect();
        union_all(members)
    })
    .ok()?;
    repaired.is_valid().then_some(repaired)
}

/// Drop member polygons whose area does not exceed `tolerance`.
pub(crate) fn drop_slivers(geometry: MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geometry
            .0
            .into_iter()
            .filter(|polygon| polygon.unsigned_area() > tolerance)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use rstest::rstest;

    #[rstest]
    fn guard_reports_panics() {
        let result: Result<(), String> = guard(|| panic!("boom"));
        assert_eq!(result, Err("boom".to_owned()));
    }

    #[rstest]
    fn repair_merges_overlapping_members() {
        let first = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let second = polygon![(x: 1.0, y: 1.0), (x: 3.0, y: 1.0), (x: 3.0, y: 3.0), (x: 1.0, y: 3.0)];
        let overlapping = MultiPolygon::new(vec![first, second]);
        assert!(!overlapping.is_valid());
        let repaired = repair(overlapping).expect("repairable");
        assert_eq!(repaired.0.len(), 1);
        assert!((repaired.unsigned_area() - 7.0).abs() < 1e-9);
    }

    #[rstest]
    fn repair_keeps_the_area_of_side_by_side_overlaps() {
        let left = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let right = polygon![(x: 1.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 2.0), (x: 1.0, y: 2.0)];
        let repaired = repair(MultiPolygon::new(vec![left, right])).expect("repairable");
        assert_eq!(repaired.0.len(), 1);
        assert!((repaired.unsigned_area() - 6.0).abs() < 1e-9);
    }

    #[rstest]
    fn slivers_are_removed() {
        let big = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let flat = polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 7.0, y: 5.0)];
        let cleaned = drop_slivers(MultiPolygon::new(vec![big, flat]), 1e-9);
        assert_eq!(cleaned.0.len(), 1);
    }
}
