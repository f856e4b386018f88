// GeoJSON-shaped JSON rendering for outbound payloads.
//
// Members follow RFC 7946 (`type` + `coordinates` / `geometries`). A non-zero
// SRID is carried in an extra top-level `srid` member.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::{Coord, Geometry, Shape};

impl Geometry {
    pub fn to_geojson(&self) -> Value {
        let mut v = shape_to_geojson(self.shape());
        if self.has_srid() {
            if let Value::Object(map) = &mut v {
                map.insert("srid".to_string(), json!(self.srid()));
            }
        }
        v
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

fn position(c: &Coord) -> Value {
    let mut out = vec![json!(c.x), json!(c.y)];
    if let Some(z) = c.z {
        out.push(json!(z));
    }
    if let Some(m) = c.m {
        out.push(json!(m));
    }
    Value::Array(out)
}

fn positions(cs: &[Coord]) -> Value {
    Value::Array(cs.iter().map(position).collect())
}

fn rings(rs: &[Vec<Coord>]) -> Value {
    Value::Array(rs.iter().map(|r| positions(r)).collect())
}

fn shape_to_geojson(shape: &Shape) -> Value {
    let coordinates = match shape {
        Shape::Point(Some(c)) => position(c),
        Shape::Point(None) => json!([]),
        Shape::LineString(cs) | Shape::MultiPoint(cs) => positions(cs),
        Shape::Polygon(rs) => rings(rs),
        Shape::MultiLineString(lines) => Value::Array(lines.iter().map(|l| positions(l)).collect()),
        Shape::MultiPolygon(polys) => Value::Array(polys.iter().map(|p| rings(p)).collect()),
        Shape::GeometryCollection(members) => {
            return json!({
                "type": shape.type_name(),
                "geometries": members.iter().map(shape_to_geojson).collect::<Vec<_>>(),
            });
        }
    };
    json!({ "type": shape.type_name(), "coordinates": coordinates })
}
