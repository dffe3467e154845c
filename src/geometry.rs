use std::fmt;

use geo::{
    BooleanOps, Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Polygon, Validation,
};

use crate::domain::Crs;
use crate::error::IngestError;

/// Buffer distance used when a mixed geometry collection forces points and
/// lines into the polygonal dissolve. Roughly half a metre in both cases:
/// 0.5 in projected metric CRSs, the equivalent angular distance in WGS84.
pub fn buffer_distance(crs: Crs) -> f64 {
    if crs.is_geographic() {
        4.49e-6
    } else {
        0.5
    }
}

/// Single geometry kinds a normalized record may carry. Collections never
/// survive normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryKind {
    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) => Some(GeometryKind::Point),
            Geometry::LineString(_) => Some(GeometryKind::LineString),
            Geometry::Polygon(_) => Some(GeometryKind::Polygon),
            Geometry::MultiPoint(_) => Some(GeometryKind::MultiPoint),
            Geometry::MultiLineString(_) => Some(GeometryKind::MultiLineString),
            Geometry::MultiPolygon(_) => Some(GeometryKind::MultiPolygon),
            _ => None,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::MultiPolygon => "MultiPolygon",
        };
        write!(f, "{name}")
    }
}

/// Collapses geometry collections into a single-kind geometry and repairs
/// topological invalidity. Non-collection inputs pass through the repair
/// step unchanged otherwise.
pub fn normalize(geometry: Geometry<f64>, crs: Crs) -> Result<Geometry<f64>, IngestError> {
    let geometry = canonicalize(geometry);
    let collapsed = match geometry {
        Geometry::GeometryCollection(collection) => {
            collapse_collection(collection, buffer_distance(crs))?
        }
        other => other,
    };
    Ok(repair(collapsed))
}

/// Rect, Triangle and Line never come out of GeoJSON, but the match must
/// not lose them if a caller hands one in.
fn canonicalize(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon()),
        Geometry::Triangle(triangle) => Geometry::Polygon(triangle.to_polygon()),
        Geometry::Line(line) => {
            Geometry::LineString(LineString::new(vec![line.start, line.end]))
        }
        other => other,
    }
}

fn collapse_collection(
    collection: GeometryCollection<f64>,
    buffer: f64,
) -> Result<Geometry<f64>, IngestError> {
    let children: Vec<Geometry<f64>> = collection.0.into_iter().map(canonicalize).collect();

    if children
        .iter()
        .any(|child| matches!(child, Geometry::GeometryCollection(_)))
    {
        return Err(IngestError::UnsupportedGeometry(
            "nested geometry collection".to_string(),
        ));
    }
    if children.is_empty() {
        return Err(IngestError::UnsupportedGeometry(
            "empty geometry collection".to_string(),
        ));
    }
    if children.len() == 1 {
        return Ok(children.into_iter().next().unwrap());
    }

    let kinds: Vec<GeometryKind> = children
        .iter()
        .map(|child| GeometryKind::of(child).expect("collections were rejected above"))
        .collect();
    let first = kinds[0];
    if kinds.iter().all(|kind| *kind == first) {
        return Ok(merge_uniform(children, first));
    }

    Ok(Geometry::MultiPolygon(dissolve_mixed(children, buffer)))
}

/// All children share one kind: simple kinds wrap into the Multi-kind,
/// Multi-kinds flatten their members so Multis never nest.
fn merge_uniform(children: Vec<Geometry<f64>>, kind: GeometryKind) -> Geometry<f64> {
    match kind {
        GeometryKind::Point => Geometry::MultiPoint(MultiPoint::new(
            children
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::Point(p) => Some(p),
                    _ => None,
                })
                .collect(),
        )),
        GeometryKind::LineString => Geometry::MultiLineString(MultiLineString::new(
            children
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::LineString(l) => Some(l),
                    _ => None,
                })
                .collect(),
        )),
        GeometryKind::Polygon => Geometry::MultiPolygon(MultiPolygon::new(
            children
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::Polygon(p) => Some(p),
                    _ => None,
                })
                .collect(),
        )),
        GeometryKind::MultiPoint => Geometry::MultiPoint(MultiPoint::new(
            children
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::MultiPoint(mp) => mp.0,
                    _ => Vec::new(),
                })
                .collect(),
        )),
        GeometryKind::MultiLineString => Geometry::MultiLineString(MultiLineString::new(
            children
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::MultiLineString(ml) => ml.0,
                    _ => Vec::new(),
                })
                .collect(),
        )),
        GeometryKind::MultiPolygon => Geometry::MultiPolygon(MultiPolygon::new(
            children
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::MultiPolygon(mp) => mp.0,
                    _ => Vec::new(),
                })
                .collect(),
        )),
    }
}

/// Mixed kinds: points and lines get an areal buffer, polygons stay as-is,
/// and the whole set dissolves into one combined multipolygon.
fn dissolve_mixed(children: Vec<Geometry<f64>>, buffer: f64) -> MultiPolygon<f64> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for child in children {
        match child {
            Geometry::Polygon(p) => polygons.push(p),
            Geometry::MultiPolygon(mp) => polygons.extend(mp.0),
            Geometry::Point(p) => polygons.push(disc(p.0, buffer)),
            Geometry::MultiPoint(mp) => {
                polygons.extend(mp.0.into_iter().map(|p| disc(p.0, buffer)));
            }
            Geometry::LineString(line) => polygons.extend(buffer_line(&line, buffer)),
            Geometry::MultiLineString(lines) => {
                for line in &lines.0 {
                    polygons.extend(buffer_line(line, buffer));
                }
            }
            // Canonicalized and collection-checked before this point.
            _ => {}
        }
    }
    dissolve(polygons)
}

fn dissolve(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut merged = MultiPolygon::new(Vec::new());
    for polygon in polygons {
        merged = merged.union(&MultiPolygon::new(vec![polygon]));
    }
    merged
}

const DISC_VERTICES: usize = 16;

/// Regular 16-gon approximation of a circular buffer around one point.
fn disc(center: Coord<f64>, radius: f64) -> Polygon<f64> {
    let mut ring = Vec::with_capacity(DISC_VERTICES + 1);
    for i in 0..DISC_VERTICES {
        let angle = std::f64::consts::TAU * (i as f64) / (DISC_VERTICES as f64);
        ring.push(Coord {
            x: center.x + radius * angle.cos(),
            y: center.y + radius * angle.sin(),
        });
    }
    ring.push(ring[0]);
    Polygon::new(LineString::new(ring), Vec::new())
}

/// Capsule approximation of a line buffer: one rectangle per segment plus
/// a disc at every vertex, merged by the caller's dissolve.
fn buffer_line(line: &LineString<f64>, radius: f64) -> Vec<Polygon<f64>> {
    let mut parts: Vec<Polygon<f64>> = line.coords().map(|c| disc(*c, radius)).collect();
    for segment in line.lines() {
        let dx = segment.end.x - segment.start.x;
        let dy = segment.end.y - segment.start.y;
        let length = (dx * dx + dy * dy).sqrt();
        if length == 0.0 {
            continue;
        }
        let nx = -dy / length * radius;
        let ny = dx / length * radius;
        let ring = vec![
            Coord {
                x: segment.start.x + nx,
                y: segment.start.y + ny,
            },
            Coord {
                x: segment.end.x + nx,
                y: segment.end.y + ny,
            },
            Coord {
                x: segment.end.x - nx,
                y: segment.end.y - ny,
            },
            Coord {
                x: segment.start.x - nx,
                y: segment.start.y - ny,
            },
            Coord {
                x: segment.start.x + nx,
                y: segment.start.y + ny,
            },
        ];
        parts.push(Polygon::new(LineString::new(ring), Vec::new()));
    }
    parts
}

/// Re-resolves topologically invalid areal geometries through a boolean
/// self-union, the closest valid interpretation of their rings. Point and
/// line geometries have no ring topology to repair and pass through.
fn repair(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Polygon(polygon) => {
            if polygon.is_valid() {
                return Geometry::Polygon(polygon);
            }
            let mut resolved = MultiPolygon::new(vec![polygon]).union(&MultiPolygon::new(Vec::new()));
            if resolved.0.len() == 1 {
                Geometry::Polygon(resolved.0.remove(0))
            } else {
                Geometry::MultiPolygon(resolved)
            }
        }
        Geometry::MultiPolygon(multi) => {
            if multi.is_valid() {
                return Geometry::MultiPolygon(multi);
            }
            Geometry::MultiPolygon(multi.union(&MultiPolygon::new(Vec::new())))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo::{point, polygon, Area};

    use super::*;

    fn unit_square() -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]
    }

    #[test]
    fn same_kind_points_collapse_to_multipoint() {
        let collection = GeometryCollection(vec![
            Geometry::Point(point!(x: 1.0, y: 2.0)),
            Geometry::Point(point!(x: 3.0, y: 4.0)),
            Geometry::Point(point!(x: 5.0, y: 6.0)),
        ]);
        let normalized =
            normalize(Geometry::GeometryCollection(collection), Crs::Euref).unwrap();
        let Geometry::MultiPoint(points) = normalized else {
            panic!("expected MultiPoint");
        };
        assert_eq!(
            points.0,
            vec![
                point!(x: 1.0, y: 2.0),
                point!(x: 3.0, y: 4.0),
                point!(x: 5.0, y: 6.0)
            ]
        );
    }

    #[test]
    fn single_member_collection_unwraps() {
        let collection =
            GeometryCollection(vec![Geometry::Polygon(unit_square())]);
        let normalized =
            normalize(Geometry::GeometryCollection(collection), Crs::Euref).unwrap();
        assert_matches!(normalized, Geometry::Polygon(_));
    }

    #[test]
    fn uniform_multilinestrings_flatten() {
        let a = MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (1.0, 0.0)])]);
        let b = MultiLineString::new(vec![
            LineString::from(vec![(2.0, 0.0), (3.0, 0.0)]),
            LineString::from(vec![(4.0, 0.0), (5.0, 0.0)]),
        ]);
        let collection = GeometryCollection(vec![
            Geometry::MultiLineString(a),
            Geometry::MultiLineString(b),
        ]);
        let normalized =
            normalize(Geometry::GeometryCollection(collection), Crs::Euref).unwrap();
        let Geometry::MultiLineString(merged) = normalized else {
            panic!("expected MultiLineString");
        };
        assert_eq!(merged.0.len(), 3);
    }

    #[test]
    fn mixed_kinds_dissolve_to_multipolygon_with_grown_area() {
        let square = unit_square();
        let original_area = square.unsigned_area();
        let collection = GeometryCollection(vec![
            Geometry::Point(point!(x: 20.0, y: 20.0)),
            Geometry::Polygon(square),
        ]);
        let normalized =
            normalize(Geometry::GeometryCollection(collection), Crs::Euref).unwrap();
        let Geometry::MultiPolygon(dissolved) = normalized else {
            panic!("expected MultiPolygon");
        };
        assert!(dissolved.unsigned_area() >= original_area);
        // The buffered point is disjoint from the square, so both survive.
        assert_eq!(dissolved.0.len(), 2);
    }

    #[test]
    fn nested_collection_is_rejected() {
        let inner = GeometryCollection(vec![Geometry::Point(point!(x: 0.0, y: 0.0))]);
        let outer = GeometryCollection(vec![
            Geometry::GeometryCollection(inner),
            Geometry::Point(point!(x: 1.0, y: 1.0)),
        ]);
        let err = normalize(Geometry::GeometryCollection(outer), Crs::Euref).unwrap_err();
        assert_matches!(err, IngestError::UnsupportedGeometry(_));
    }

    #[test]
    fn empty_collection_is_rejected() {
        let err = normalize(
            Geometry::GeometryCollection(GeometryCollection(Vec::new())),
            Crs::Wgs84,
        )
        .unwrap_err();
        assert_matches!(err, IngestError::UnsupportedGeometry(_));
    }

    #[test]
    fn non_collection_passes_through() {
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]);
        let normalized = normalize(Geometry::LineString(line.clone()), Crs::Wgs84).unwrap();
        assert_eq!(normalized, Geometry::LineString(line));
    }

    #[test]
    fn point_buffer_has_positive_area() {
        let buffered = disc(Coord { x: 0.0, y: 0.0 }, 0.5);
        assert!(buffered.unsigned_area() > 0.0);
        // 16-gon stays inside the true circle.
        assert!(buffered.unsigned_area() < std::f64::consts::PI * 0.25);
    }

    #[test]
    fn geographic_crs_uses_angular_buffer() {
        assert!(buffer_distance(Crs::Wgs84) < buffer_distance(Crs::Euref));
    }
}
