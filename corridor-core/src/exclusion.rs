//! Subtraction of protected areas from the merged result.
//!
//! The difference is taken once, after the global union. An R*-tree over
//! member envelopes narrows the exclusion layer to the polygons that can
//! touch the merged result before the boolean operation runs.

use geo::{BooleanOps, BoundingRect, MultiPolygon, Polygon};
use rstar::{
    AABB, RTree,
    primitives::{GeomWithData, Rectangle},
};

use crate::geometry::{self, drop_slivers, guard, repair};

type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Read-only set of protected-area polygons shared by a run.
///
/// # Examples
///
/// ```
/// use corridor_core::ExclusionLayer;
/// use geo::{Area, MultiPolygon, polygon};
///
/// let park = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
/// let layer = ExclusionLayer::new([park]);
/// let merged: MultiPolygon<f64> =
///     polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 1.0), (x: 0.0, y: 1.0)].into();
/// let remaining = layer.subtract(&merged, 1e-9).unwrap();
/// assert!((remaining.unsigned_area() - 3.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct ExclusionLayer {
    polygons: Vec<Polygon<f64>>,
    index: RTree<IndexedEnvelope>,
}

impl ExclusionLayer {
    /// Index the given polygons. Empty polygons are ignored.
    #[must_use]
    pub fn new(polygons: impl IntoIterator<Item = Polygon<f64>>) -> Self {
        let polygons: Vec<_> = polygons
            .into_iter()
            .filter(|polygon| polygon.bounding_rect().is_some())
            .collect();
        let envelopes = polygons
            .iter()
            .enumerate()
            .filter_map(|(position, polygon)| {
                let rect = polygon.bounding_rect()?;
                let rectangle =
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
                Some(GeomWithData::new(rectangle, position))
            })
            .collect();
        Self {
            polygons,
            index: RTree::bulk_load(envelopes),
        }
    }

    /// Number of polygons in the layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    /// Whether the layer holds no polygons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Polygons whose envelopes intersect `geometry`'s envelope, in layer order.
    #[must_use]
    pub fn candidates(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        let Some(rect) = geometry.bounding_rect() else {
            return geometry::empty();
        };
        let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut positions: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        positions.sort_unstable();
        MultiPolygon::new(
            positions
                .into_iter()
                .filter_map(|position| self.polygons.get(position).cloned())
                .collect(),
        )
    }

    /// Remove the layer's area from `merged`.
    ///
    /// Parts left with no more than `area_tolerance` of area are dropped
    /// rather than kept as zero-area artefacts. Errors carry the geometry
    /// engine's message.
    pub fn subtract(
        &self,
        merged: &MultiPolygon<f64>,
        area_tolerance: f64,
    ) -> Result<MultiPolygon<f64>, String> {
        let candidates = self.candidates(merged);
        if candidates.0.is_empty() {
            return Ok(merged.clone());
        }
        let difference = guard(|| merged.difference(&candidates))?;
        let cleaned = drop_slivers(difference, area_tolerance);
        repair(cleaned).ok_or_else(|| "difference produced an unrepairable geometry".to_owned())
    }
}

/// Subtract an optional exclusion layer; without one this is the identity.
pub fn subtract(
    merged: MultiPolygon<f64>,
    exclusion: Option<&ExclusionLayer>,
    area_tolerance: f64,
) -> Result<MultiPolygon<f64>, String> {
    match exclusion {
        Some(layer) => layer.subtract(&merged, area_tolerance),
        None => Ok(merged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, polygon};
    use rstest::{fixture, rstest};

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
    }

    #[fixture]
    fn merged() -> MultiPolygon<f64> {
        square(0.0, 0.0, 10.0).into()
    }

    #[rstest]
    fn covering_exclusion_empties_the_region(merged: MultiPolygon<f64>) {
        let layer = ExclusionLayer::new([square(-1.0, -1.0, 12.0)]);
        let result = layer.subtract(&merged, 1e-9).expect("difference");
        assert!(result.0.is_empty());
    }

    #[rstest]
    fn disjoint_exclusion_leaves_result_unchanged(merged: MultiPolygon<f64>) {
        let layer = ExclusionLayer::new([square(50.0, 50.0, 5.0)]);
        assert!(layer.candidates(&merged).0.is_empty());
        let result = layer.subtract(&merged, 1e-9).expect("difference");
        assert_eq!(result, merged);
    }

    #[rstest]
    fn partial_overlap_removes_only_the_shared_area(merged: MultiPolygon<f64>) {
        let layer = ExclusionLayer::new([square(5.0, 5.0, 10.0), square(100.0, 0.0, 1.0)]);
        assert_eq!(layer.candidates(&merged).0.len(), 1);
        let result = layer.subtract(&merged, 1e-9).expect("difference");
        assert!((result.unsigned_area() - 75.0).abs() < 1e-9);
    }

    #[rstest]
    fn missing_layer_is_identity(merged: MultiPolygon<f64>) {
        let result = subtract(merged.clone(), None, 1e-9).expect("identity");
        assert_eq!(result, merged);
    }

    #[rstest]
    fn touching_exclusion_leaves_no_zero_area_artifact(merged: MultiPolygon<f64>) {
        // Shares only the right-hand edge with the merged square.
        let layer = ExclusionLayer::new([square(10.0, 0.0, 10.0)]);
        let result = layer.subtract(&merged, 1e-9).expect("difference");
        assert_eq!(result.0.len(), 1);
        assert!((result.unsigned_area() - 100.0).abs() < 1e-9);
    }
}
