//! Geometry validity checks.
//!
//! [`check_structure`] is linear in the number of coordinates and runs
//! before every boolean operation. [`check_ring_simple`] indexes the ring's
//! edges in an R-tree and only tests edges whose bounding boxes overlap.

use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Area, Coord, Line, LineString, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::GeometryError;

/// Checks that a longitude/latitude pair is finite and within WGS84 range.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidCoordinate`] otherwise.
pub fn check_coordinate(x: f64, y: f64) -> Result<(), GeometryError> {
    if x.is_finite() && y.is_finite() && (-180.0..=180.0).contains(&x) && (-90.0..=90.0).contains(&y)
    {
        Ok(())
    } else {
        Err(GeometryError::InvalidCoordinate { x, y })
    }
}

/// Structural checks: non-empty, valid coordinates, closed rings with at
/// least four coordinates, and non-zero polygon area.
///
/// # Errors
///
/// Returns the first problem found.
pub fn check_structure(polygon: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    if polygon.0.is_empty() {
        return Err(GeometryError::Empty);
    }

    for part in &polygon.0 {
        check_ring_structure(part.exterior())?;
        for interior in part.interiors() {
            check_ring_structure(interior)?;
        }
        if part.unsigned_area() <= 0.0 {
            return Err(GeometryError::ZeroArea);
        }
    }

    Ok(())
}

fn check_ring_structure(ring: &LineString<f64>) -> Result<(), GeometryError> {
    let coords = &ring.0;
    if coords.len() < 4 {
        return Err(GeometryError::DegenerateRing {
            points: coords.len(),
        });
    }
    for coord in coords {
        check_coordinate(coord.x, coord.y)?;
    }
    if coords.first() != coords.last() {
        return Err(GeometryError::UnclosedRing);
    }
    Ok(())
}

/// One ring edge stored in the R-tree with its position in the ring.
struct Edge {
    position: usize,
    line: Line<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for Edge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Checks that no two edges of a closed ring cross or overlap.
///
/// Repeated consecutive coordinates are ignored. Neighbouring edges may
/// share their common vertex but must not run back over each other.
///
/// # Errors
///
/// Returns [`GeometryError::SelfIntersection`] at the first crossing found,
/// or [`GeometryError::DegenerateRing`] if fewer than three distinct edges
/// remain.
pub fn check_ring_simple(ring: &LineString<f64>) -> Result<(), GeometryError> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for coord in &ring.0 {
        if coords.last() != Some(coord) {
            coords.push(*coord);
        }
    }

    let edge_count = coords.len().saturating_sub(1);
    if edge_count < 3 {
        return Err(GeometryError::DegenerateRing {
            points: coords.len(),
        });
    }

    let edges: Vec<Edge> = coords
        .windows(2)
        .enumerate()
        .map(|(position, pair)| {
            let line = Line::new(pair[0], pair[1]);
            Edge {
                position,
                envelope: AABB::from_corners(
                    [line.start.x.min(line.end.x), line.start.y.min(line.end.y)],
                    [line.start.x.max(line.end.x), line.start.y.max(line.end.y)],
                ),
                line,
            }
        })
        .collect();

    let tree = RTree::bulk_load(edges);

    for edge in tree.iter() {
        for other in tree.locate_in_envelope_intersecting(&edge.envelope) {
            if other.position <= edge.position {
                continue;
            }

            let neighbours = other.position == edge.position + 1
                || (edge.position == 0 && other.position == edge_count - 1);

            match line_intersection(edge.line, other.line) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if neighbours => {}
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    return Err(GeometryError::SelfIntersection {
                        x: intersection.x,
                        y: intersection.y,
                    });
                }
                Some(LineIntersection::Collinear { intersection })
                    if neighbours && intersection.start == intersection.end => {}
                Some(LineIntersection::Collinear { intersection }) => {
                    return Err(GeometryError::SelfIntersection {
                        x: intersection.start.x,
                        y: intersection.start.y,
                    });
                }
            }
        }
    }

    Ok(())
}
