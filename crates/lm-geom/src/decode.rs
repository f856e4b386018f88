//! EWKB decoder.
//!
//! Single-pass recursive descent over an explicit cursor. Every block
//! (including every member of a multi-geometry or collection) starts with its
//! own byte-order mark and type word, which are re-read, never inherited.
//! Only the SRID is inherited: it is read from the top-level block and applies
//! to the whole value.

use crate::{
    type_name_for_code, ByteOrder, Coord, Dimensions, Geometry, GeometryError, Ring, Shape,
    FLAG_M, FLAG_SRID, FLAG_Z, SRID_UNSET, TYPE_GEOMETRYCOLLECTION, TYPE_LINESTRING,
    TYPE_MULTILINESTRING, TYPE_MULTIPOINT, TYPE_MULTIPOLYGON, TYPE_POINT, TYPE_POLYGON,
};

/// Deepest collection nesting accepted before the payload is rejected.
pub const MAX_NESTING: usize = 32;

/// Smallest possible nested block: byte-order mark + type word.
const MIN_BLOCK_BYTES: usize = 5;

/// Decode a binary EWKB payload.
pub fn decode(bytes: &[u8]) -> Result<Geometry, GeometryError> {
    let mut cursor = Cursor::new(bytes);
    let header = cursor.read_header()?;
    let srid = header.srid.unwrap_or(SRID_UNSET);
    let shape = read_shape(&mut cursor, &header, 0)?;

    if cursor.remaining() > 0 {
        return Err(GeometryError::TrailingBytes {
            remaining: cursor.remaining(),
        });
    }

    Ok(Geometry::new(srid, header.dims, shape))
}

/// Decode the hex text form Postgres uses for `geometry` columns in text
/// result format (e.g. `0101000020E6100000...`). Case-insensitive.
pub fn decode_hex(text: &str) -> Result<Geometry, GeometryError> {
    let bytes =
        hex::decode(text.trim()).map_err(|e| GeometryError::InvalidHex(e.to_string()))?;
    decode(&bytes)
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Header {
    order: ByteOrder,
    kind: u8,
    dims: Dimensions,
    srid: Option<i32>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn ensure(&self, needed: usize) -> Result<(), GeometryError> {
        if self.remaining() < needed {
            return Err(GeometryError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], GeometryError> {
        self.ensure(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, GeometryError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self, order: ByteOrder) -> Result<u32, GeometryError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(match order {
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
        })
    }

    fn read_i32(&mut self, order: ByteOrder) -> Result<i32, GeometryError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(match order {
            ByteOrder::BigEndian => i32::from_be_bytes(raw),
            ByteOrder::LittleEndian => i32::from_le_bytes(raw),
        })
    }

    fn read_f64(&mut self, order: ByteOrder) -> Result<f64, GeometryError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(match order {
            ByteOrder::BigEndian => f64::from_be_bytes(raw),
            ByteOrder::LittleEndian => f64::from_le_bytes(raw),
        })
    }

    /// Count prefix, checked against the bytes actually left so a corrupt
    /// count cannot trigger a huge allocation.
    fn read_count(&mut self, order: ByteOrder, min_item_bytes: usize) -> Result<usize, GeometryError> {
        let count = self.read_u32(order)? as usize;
        self.ensure(count.saturating_mul(min_item_bytes))?;
        Ok(count)
    }

    fn read_header(&mut self) -> Result<Header, GeometryError> {
        let order = ByteOrder::from_mark(self.read_u8()?)?;
        let word = self.read_u32(order)?;

        let kind_bits = word & !(FLAG_Z | FLAG_M | FLAG_SRID);
        let kind = match u8::try_from(kind_bits) {
            Ok(k) if (TYPE_POINT..=TYPE_GEOMETRYCOLLECTION).contains(&k) => k,
            _ => return Err(GeometryError::UnknownGeometryType(word)),
        };

        let srid = if word & FLAG_SRID != 0 {
            Some(self.read_i32(order)?)
        } else {
            None
        };

        Ok(Header {
            order,
            kind,
            dims: Dimensions::from_type_word(word),
            srid,
        })
    }

    fn read_coord(&mut self, order: ByteOrder, dims: Dimensions) -> Result<Coord, GeometryError> {
        let x = self.read_f64(order)?;
        let y = self.read_f64(order)?;
        let z = if dims.has_z {
            Some(self.read_f64(order)?)
        } else {
            None
        };
        let m = if dims.has_m {
            Some(self.read_f64(order)?)
        } else {
            None
        };
        Ok(Coord { x, y, z, m })
    }

    fn read_coords(&mut self, order: ByteOrder, dims: Dimensions) -> Result<Vec<Coord>, GeometryError> {
        let n = self.read_count(order, dims.ordinates() * 8)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_coord(order, dims)?);
        }
        Ok(out)
    }

    fn read_rings(&mut self, order: ByteOrder, dims: Dimensions) -> Result<Vec<Ring>, GeometryError> {
        let n = self.read_count(order, 4)?;
        let mut rings = Vec::with_capacity(n);
        for ring in 0..n {
            let coords = self.read_coords(order, dims)?;
            if coords.len() < 4 {
                return Err(GeometryError::RingTooShort {
                    ring,
                    len: coords.len(),
                });
            }
            if coords.first() != coords.last() {
                return Err(GeometryError::RingNotClosed { ring });
            }
            rings.push(coords);
        }
        Ok(rings)
    }
}

// ---------------------------------------------------------------------------
// Variant bodies
// ---------------------------------------------------------------------------

fn read_shape(cur: &mut Cursor<'_>, header: &Header, depth: usize) -> Result<Shape, GeometryError> {
    let (order, dims) = (header.order, header.dims);

    match header.kind {
        TYPE_POINT => {
            let c = cur.read_coord(order, dims)?;
            if c.x.is_nan() && c.y.is_nan() {
                Ok(Shape::Point(None))
            } else {
                Ok(Shape::Point(Some(c)))
            }
        }
        TYPE_LINESTRING => Ok(Shape::LineString(cur.read_coords(order, dims)?)),
        TYPE_POLYGON => Ok(Shape::Polygon(cur.read_rings(order, dims)?)),
        TYPE_MULTIPOINT => {
            let n = cur.read_count(order, MIN_BLOCK_BYTES)?;
            let mut points = Vec::with_capacity(n);
            for index in 0..n {
                match read_member(cur, dims, Some(TYPE_POINT), depth)? {
                    Shape::Point(Some(c)) => points.push(c),
                    _ => return Err(GeometryError::EmptyMember { index }),
                }
            }
            Ok(Shape::MultiPoint(points))
        }
        TYPE_MULTILINESTRING => {
            let n = cur.read_count(order, MIN_BLOCK_BYTES)?;
            let mut lines = Vec::with_capacity(n);
            for _ in 0..n {
                if let Shape::LineString(cs) = read_member(cur, dims, Some(TYPE_LINESTRING), depth)? {
                    lines.push(cs);
                }
            }
            Ok(Shape::MultiLineString(lines))
        }
        TYPE_MULTIPOLYGON => {
            let n = cur.read_count(order, MIN_BLOCK_BYTES)?;
            let mut polys = Vec::with_capacity(n);
            for _ in 0..n {
                if let Shape::Polygon(rings) = read_member(cur, dims, Some(TYPE_POLYGON), depth)? {
                    polys.push(rings);
                }
            }
            Ok(Shape::MultiPolygon(polys))
        }
        TYPE_GEOMETRYCOLLECTION => {
            let n = cur.read_count(order, MIN_BLOCK_BYTES)?;
            let mut members = Vec::with_capacity(n);
            for _ in 0..n {
                members.push(read_member(cur, dims, None, depth)?);
            }
            Ok(Shape::GeometryCollection(members))
        }
        // read_header only admits codes 1..=7
        other => Err(GeometryError::UnknownGeometryType(u32::from(other))),
    }
}

/// Read one nested block. Its own header is decoded from scratch; an SRID on
/// a member, if present, is consumed and ignored.
fn read_member(
    cur: &mut Cursor<'_>,
    parent_dims: Dimensions,
    expected: Option<u8>,
    depth: usize,
) -> Result<Shape, GeometryError> {
    let depth = depth + 1;
    if depth > MAX_NESTING {
        return Err(GeometryError::NestingTooDeep { depth: MAX_NESTING });
    }

    let header = cur.read_header()?;
    if header.dims != parent_dims {
        return Err(GeometryError::InconsistentDimensions);
    }
    if let Some(want) = expected {
        if header.kind != want {
            return Err(GeometryError::UnexpectedSubGeometry {
                expected: type_name_for_code(want),
                found: type_name_for_code(header.kind),
            });
        }
    }

    read_shape(cur, &header, depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT_4326_LE: &str = "0101000020E6100000000000000000F03F0000000000000040";

    #[test]
    fn decodes_srid_point() {
        let g = decode_hex(POINT_4326_LE).unwrap();
        assert_eq!(g.srid(), 4326);
        assert_eq!(g.dimensions(), Dimensions::XY);
        assert_eq!(g.shape(), &Shape::Point(Some(Coord::xy(1.0, 2.0))));
    }

    #[test]
    fn hex_is_case_insensitive() {
        let upper = decode_hex(POINT_4326_LE).unwrap();
        let lower = decode_hex(&POINT_4326_LE.to_ascii_lowercase()).unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn invalid_hex_is_rejected() {
        assert!(matches!(
            decode_hex("01zz"),
            Err(GeometryError::InvalidHex(_))
        ));
    }

    #[test]
    fn empty_buffer_is_truncated() {
        assert!(matches!(
            decode(&[]),
            Err(GeometryError::Truncated { offset: 0, .. })
        ));
    }

    #[test]
    fn nan_point_is_empty() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&f64::NAN.to_le_bytes());
        bytes.extend_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap().shape(), &Shape::Point(None));
    }

    #[test]
    fn reserved_type_bits_are_unknown() {
        // ISO-style 1001 (PointZ) does not fit the low byte.
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&1001u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        assert!(matches!(
            decode(&bytes),
            Err(GeometryError::UnknownGeometryType(1001))
        ));
    }

    #[test]
    fn huge_count_fails_without_allocating() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(GeometryError::Truncated { offset: 9, .. })
        ));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut bytes = Vec::new();
        for _ in 0..=MAX_NESTING + 1 {
            bytes.push(1u8);
            bytes.extend_from_slice(&7u32.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        assert!(matches!(
            decode(&bytes),
            Err(GeometryError::NestingTooDeep { .. })
        ));
    }
}
