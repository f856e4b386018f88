//! EWKB encoder.
//!
//! Produces the PostGIS layout: the SRID (when set) is written once on the
//! top-level block; members repeat byte-order mark and type word but never
//! the SRID.

use crate::{ByteOrder, Coord, Dimensions, Geometry, Ring, Shape, FLAG_SRID};

pub fn encode(geometry: &Geometry, order: ByteOrder) -> Vec<u8> {
    let mut w = Writer {
        out: Vec::with_capacity(9 + geometry.coord_count() * geometry.dimensions().ordinates() * 8),
        order,
        dims: geometry.dimensions(),
    };
    let srid = geometry.has_srid().then_some(geometry.srid());
    w.put_block(geometry.shape(), srid);
    w.out
}

/// Upper-case hex, as Postgres renders `geometry` in text format.
pub fn encode_hex(geometry: &Geometry, order: ByteOrder) -> String {
    hex::encode_upper(encode(geometry, order))
}

struct Writer {
    out: Vec<u8>,
    order: ByteOrder,
    dims: Dimensions,
}

impl Writer {
    fn put_u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::BigEndian => self.out.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::LittleEndian => self.out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn put_f64(&mut self, v: f64) {
        match self.order {
            ByteOrder::BigEndian => self.out.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::LittleEndian => self.out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn put_len(&mut self, n: usize) {
        // EWKB counts are u32; larger collections cannot be represented.
        self.put_u32(u32::try_from(n).unwrap_or(u32::MAX));
    }

    fn put_header(&mut self, shape: &Shape, srid: Option<i32>) {
        self.out.push(self.order.mark());
        let mut word = u32::from(shape.type_code()) | self.dims.type_flags();
        if srid.is_some() {
            word |= FLAG_SRID;
        }
        self.put_u32(word);
        if let Some(srid) = srid {
            self.put_u32(srid as u32);
        }
    }

    fn put_coord(&mut self, c: &Coord) {
        self.put_f64(c.x);
        self.put_f64(c.y);
        if self.dims.has_z {
            self.put_f64(c.z.unwrap_or(f64::NAN));
        }
        if self.dims.has_m {
            self.put_f64(c.m.unwrap_or(f64::NAN));
        }
    }

    fn put_coords(&mut self, coords: &[Coord]) {
        self.put_len(coords.len());
        for c in coords {
            self.put_coord(c);
        }
    }

    fn put_rings(&mut self, rings: &[Ring]) {
        self.put_len(rings.len());
        for ring in rings {
            self.put_coords(ring);
        }
    }

    fn put_block(&mut self, shape: &Shape, srid: Option<i32>) {
        self.put_header(shape, srid);
        match shape {
            Shape::Point(Some(c)) => self.put_coord(c),
            Shape::Point(None) => {
                let empty = Coord {
                    x: f64::NAN,
                    y: f64::NAN,
                    z: Some(f64::NAN),
                    m: Some(f64::NAN),
                };
                self.put_coord(&empty);
            }
            Shape::LineString(coords) => self.put_coords(coords),
            Shape::Polygon(rings) => self.put_rings(rings),
            Shape::MultiPoint(points) => {
                self.put_len(points.len());
                for p in points {
                    self.put_block(&Shape::Point(Some(*p)), None);
                }
            }
            Shape::MultiLineString(lines) => {
                self.put_len(lines.len());
                for line in lines {
                    self.put_header(&Shape::LineString(Vec::new()), None);
                    self.put_coords(line);
                }
            }
            Shape::MultiPolygon(polys) => {
                self.put_len(polys.len());
                for rings in polys {
                    self.put_header(&Shape::Polygon(Vec::new()), None);
                    self.put_rings(rings);
                }
            }
            Shape::GeometryCollection(members) => {
                self.put_len(members.len());
                for m in members {
                    self.put_block(m, None);
                }
            }
        }
    }
}
