//! Planar geometry predicates over GeoJSON shapes
//!
//! Warning areas are polygons or multipolygons; asset locations are points
//! or polygons (drain areas). The store normally evaluates these predicates
//! with its spatial index (`ST_Intersects` / `ST_Equals`); the functions here
//! are the same predicates evaluated in process, used by the in-memory store
//! and by change detection during ingestion.
//!
//! Boundaries count: shapes that only touch intersect.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// `[x, y]` (longitude, latitude)
pub type Position = [f64; 2];

const EPSILON: f64 = 1e-9;

/// GeoJSON geometry subset understood by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("coordinate is not finite")]
    NonFiniteCoordinate,
    #[error("polygon has no rings")]
    EmptyPolygon,
    #[error("multipolygon has no polygons")]
    EmptyMultiPolygon,
    #[error("ring needs at least 4 positions, got {0}")]
    RingTooShort(usize),
    #[error("ring is not closed")]
    RingNotClosed,
}

impl Geometry {
    /// Check structural validity (closed rings, finite coordinates)
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Geometry::Point(p) => check_position(p),
            Geometry::Polygon(rings) => check_polygon(rings),
            Geometry::MultiPolygon(polygons) => {
                if polygons.is_empty() {
                    return Err(GeometryError::EmptyMultiPolygon);
                }
                polygons.iter().try_for_each(|rings| check_polygon(rings))
            }
        }
    }

    /// GeoJSON text, as handed to `ST_GeomFromGeoJSON`
    pub fn to_geojson(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    fn parts(&self) -> Vec<Part<'_>> {
        match self {
            Geometry::Point(p) => vec![Part::Point(*p)],
            Geometry::Polygon(rings) => usable_polygon(rings).into_iter().collect(),
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .filter_map(|rings| usable_polygon(rings))
                .collect(),
        }
    }
}

fn usable_polygon(rings: &[Vec<Position>]) -> Option<Part<'_>> {
    match rings.first() {
        Some(exterior) if !exterior.is_empty() => Some(Part::Polygon(rings)),
        _ => None,
    }
}

fn check_position(p: &Position) -> Result<(), GeometryError> {
    if p[0].is_finite() && p[1].is_finite() {
        Ok(())
    } else {
        Err(GeometryError::NonFiniteCoordinate)
    }
}

fn check_polygon(rings: &[Vec<Position>]) -> Result<(), GeometryError> {
    if rings.is_empty() {
        return Err(GeometryError::EmptyPolygon);
    }
    for ring in rings {
        if ring.len() < 4 {
            return Err(GeometryError::RingTooShort(ring.len()));
        }
        ring.iter().try_for_each(check_position)?;
        if !same_position(&ring[0], &ring[ring.len() - 1]) {
            return Err(GeometryError::RingNotClosed);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Part<'a> {
    Point(Position),
    Polygon(&'a [Vec<Position>]),
}

impl Part<'_> {
    fn bbox(&self) -> BBox {
        match self {
            Part::Point(p) => BBox::of(std::iter::once(p)),
            Part::Polygon(rings) => BBox::of(rings.iter().flatten()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BBox {
    min: Position,
    max: Position,
}

impl BBox {
    fn of<'a>(positions: impl Iterator<Item = &'a Position>) -> Self {
        let mut bbox = BBox {
            min: [f64::INFINITY, f64::INFINITY],
            max: [f64::NEG_INFINITY, f64::NEG_INFINITY],
        };
        for p in positions {
            bbox.min[0] = bbox.min[0].min(p[0]);
            bbox.min[1] = bbox.min[1].min(p[1]);
            bbox.max[0] = bbox.max[0].max(p[0]);
            bbox.max[1] = bbox.max[1].max(p[1]);
        }
        bbox
    }

    fn overlaps(&self, other: &BBox) -> bool {
        self.min[0] <= other.max[0] + EPSILON
            && other.min[0] <= self.max[0] + EPSILON
            && self.min[1] <= other.max[1] + EPSILON
            && other.min[1] <= self.max[1] + EPSILON
    }
}

/// Do the two geometries share at least one point?
pub fn intersects(a: &Geometry, b: &Geometry) -> bool {
    let parts_b = b.parts();
    a.parts().iter().any(|pa| {
        let bbox_a = pa.bbox();
        parts_b
            .iter()
            .any(|pb| bbox_a.overlaps(&pb.bbox()) && parts_intersect(pa, pb))
    })
}

fn parts_intersect(a: &Part<'_>, b: &Part<'_>) -> bool {
    match (a, b) {
        (Part::Point(p), Part::Point(q)) => same_position(p, q),
        (Part::Point(p), Part::Polygon(rings)) | (Part::Polygon(rings), Part::Point(p)) => {
            polygon_covers(rings, p)
        }
        (Part::Polygon(ra), Part::Polygon(rb)) => {
            edges(ra).any(|(a1, a2)| edges(rb).any(|(b1, b2)| segments_intersect(a1, a2, b1, b2)))
                || polygon_covers(rb, &ra[0][0])
                || polygon_covers(ra, &rb[0][0])
        }
    }
}

fn edges(rings: &[Vec<Position>]) -> impl Iterator<Item = (&Position, &Position)> {
    rings
        .iter()
        .flat_map(|ring| ring.windows(2).map(|w| (&w[0], &w[1])))
}

/// Inside the exterior ring and not strictly inside a hole; boundary counts
fn polygon_covers(rings: &[Vec<Position>], p: &Position) -> bool {
    if edges(rings).any(|(a, b)| on_segment(a, b, p)) {
        return true;
    }
    let Some((exterior, holes)) = rings.split_first() else {
        return false;
    };
    ring_contains(exterior, p) && !holes.iter().any(|hole| ring_contains(hole, p))
}

/// Even-odd ray cast, boundary handled by the caller
fn ring_contains(ring: &[Position], p: &Position) -> bool {
    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a[1] > p[1]) != (b[1] > p[1]) {
            let x = a[0] + (p[1] - a[1]) * (b[0] - a[0]) / (b[1] - a[1]);
            if p[0] < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn orientation(a: &Position, b: &Position, c: &Position) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: &Position, b: &Position, p: &Position) -> bool {
    orientation(a, b, p).abs() <= EPSILON
        && p[0] >= a[0].min(b[0]) - EPSILON
        && p[0] <= a[0].max(b[0]) + EPSILON
        && p[1] >= a[1].min(b[1]) - EPSILON
        && p[1] <= a[1].max(b[1]) + EPSILON
}

fn segments_intersect(a1: &Position, a2: &Position, b1: &Position, b2: &Position) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);

    if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
    {
        return true;
    }

    on_segment(b1, b2, a1)
        || on_segment(b1, b2, a2)
        || on_segment(a1, a2, b1)
        || on_segment(a1, a2, b2)
}

fn same_position(a: &Position, b: &Position) -> bool {
    (a[0] - b[0]).abs() <= EPSILON && (a[1] - b[1]).abs() <= EPSILON
}

/// Do the two geometries describe the same shape?
///
/// Compares normalized structure: ring start vertex, ring orientation, hole
/// order and polygon order do not matter, and a single-polygon
/// `MultiPolygon` equals the plain `Polygon`. Two different decompositions
/// of the same area are reported as different.
pub fn equals(a: &Geometry, b: &Geometry) -> bool {
    let (points_a, polygons_a) = normalize(a);
    let (points_b, polygons_b) = normalize(b);

    points_a.len() == points_b.len()
        && polygons_a.len() == polygons_b.len()
        && points_a
            .iter()
            .zip(&points_b)
            .all(|(p, q)| same_position(p, q))
        && polygons_a
            .iter()
            .zip(&polygons_b)
            .all(|(p, q)| same_polygon(p, q))
}

type NormalizedPolygon = Vec<Vec<Position>>;

fn normalize(geometry: &Geometry) -> (Vec<Position>, Vec<NormalizedPolygon>) {
    let mut points = Vec::new();
    let mut polygons = Vec::new();
    for part in geometry.parts() {
        match part {
            Part::Point(p) => points.push(p),
            Part::Polygon(rings) => polygons.push(normalize_polygon(rings)),
        }
    }
    points.sort_by(cmp_position);
    polygons.sort_by(|a, b| cmp_position(&a[0][0], &b[0][0]));
    (points, polygons)
}

fn normalize_polygon(rings: &[Vec<Position>]) -> NormalizedPolygon {
    let mut normalized: Vec<Vec<Position>> = rings
        .iter()
        .filter(|r| !r.is_empty())
        .map(|r| normalize_ring(r))
        .collect();
    if normalized.len() > 2 {
        normalized[1..].sort_by(|a, b| cmp_position(&a[0], &b[0]));
    }
    normalized
}

/// Open ring, counter-clockwise, starting at its smallest vertex
fn normalize_ring(ring: &[Position]) -> Vec<Position> {
    let mut open: Vec<Position> = ring.to_vec();
    if open.len() > 1 && same_position(&open[0], &open[open.len() - 1]) {
        open.pop();
    }
    if signed_area(&open) < 0.0 {
        open.reverse();
    }
    if let Some(start) = (0..open.len()).min_by(|&i, &j| cmp_position(&open[i], &open[j])) {
        open.rotate_left(start);
    }
    open
}

fn signed_area(open_ring: &[Position]) -> f64 {
    let n = open_ring.len();
    (0..n)
        .map(|i| {
            let a = open_ring[i];
            let b = open_ring[(i + 1) % n];
            a[0] * b[1] - b[0] * a[1]
        })
        .sum::<f64>()
        / 2.0
}

fn cmp_position(a: &Position, b: &Position) -> Ordering {
    a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1]))
}

fn same_polygon(a: &NormalizedPolygon, b: &NormalizedPolygon) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(ra, rb)| {
            ra.len() == rb.len() && ra.iter().zip(rb).all(|(p, q)| same_position(p, q))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<Position> {
        vec![
            [x0, y0],
            [x0 + size, y0],
            [x0 + size, y0 + size],
            [x0, y0 + size],
            [x0, y0],
        ]
    }

    fn poly(x0: f64, y0: f64, size: f64) -> Geometry {
        Geometry::Polygon(vec![square(x0, y0, size)])
    }

    #[test]
    fn test_geojson_roundtrip_shape() {
        let g: Geometry = serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        }))
        .unwrap();
        assert_eq!(g.type_name(), "Polygon");
        assert!(g.validate().is_ok());
        assert!(g.to_geojson().contains("\"type\":\"Polygon\""));
    }

    #[test]
    fn test_validate_rejects_open_ring() {
        let g = Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]);
        assert_eq!(g.validate(), Err(GeometryError::RingNotClosed));
        let g = Geometry::MultiPolygon(vec![]);
        assert_eq!(g.validate(), Err(GeometryError::EmptyMultiPolygon));
    }

    #[test]
    fn test_overlapping_polygons_intersect() {
        assert!(intersects(&poly(0.0, 0.0, 2.0), &poly(1.0, 1.0, 2.0)));
    }

    #[test]
    fn test_disjoint_polygons_do_not_intersect() {
        assert!(!intersects(&poly(0.0, 0.0, 1.0), &poly(5.0, 5.0, 1.0)));
    }

    #[test]
    fn test_touching_polygons_intersect() {
        assert!(intersects(&poly(0.0, 0.0, 1.0), &poly(1.0, 0.0, 1.0)));
    }

    #[test]
    fn test_containment_without_edge_crossing() {
        assert!(intersects(&poly(0.0, 0.0, 10.0), &poly(4.0, 4.0, 1.0)));
        assert!(intersects(&poly(4.0, 4.0, 1.0), &poly(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_point_in_polygon_and_hole() {
        let with_hole = Geometry::Polygon(vec![square(0.0, 0.0, 10.0), square(4.0, 4.0, 2.0)]);
        assert!(intersects(&with_hole, &Geometry::Point([1.0, 1.0])));
        assert!(!intersects(&with_hole, &Geometry::Point([5.0, 5.0])));
        // on the hole boundary
        assert!(intersects(&with_hole, &Geometry::Point([4.0, 5.0])));
        assert!(!intersects(&with_hole, &Geometry::Point([11.0, 1.0])));
    }

    #[test]
    fn test_polygon_inside_hole_does_not_intersect() {
        let with_hole = Geometry::Polygon(vec![square(0.0, 0.0, 10.0), square(3.0, 3.0, 4.0)]);
        assert!(!intersects(&with_hole, &poly(4.0, 4.0, 1.0)));
    }

    #[test]
    fn test_multipolygon_intersects_any_member() {
        let multi = Geometry::MultiPolygon(vec![
            vec![square(0.0, 0.0, 1.0)],
            vec![square(10.0, 10.0, 1.0)],
        ]);
        assert!(intersects(&multi, &Geometry::Point([10.5, 10.5])));
        assert!(!intersects(&multi, &Geometry::Point([5.0, 5.0])));
    }

    #[test]
    fn test_equals_ignores_start_vertex_and_orientation() {
        let a = poly(0.0, 0.0, 1.0);
        let b = Geometry::Polygon(vec![vec![
            [1.0, 1.0],
            [1.0, 0.0],
            [0.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
        ]]);
        assert!(equals(&a, &b));
        assert!(equals(&a, &Geometry::MultiPolygon(vec![vec![square(0.0, 0.0, 1.0)]])));
    }

    #[test]
    fn test_equals_detects_moved_shape() {
        assert!(!equals(&poly(0.0, 0.0, 1.0), &poly(0.0, 0.0, 1.5)));
        assert!(!equals(&Geometry::Point([1.0, 2.0]), &poly(0.0, 0.0, 1.0)));
        assert!(equals(&Geometry::Point([1.0, 2.0]), &Geometry::Point([1.0, 2.0])));
    }
}
