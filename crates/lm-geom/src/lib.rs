//! lm-geom
//!
//! PostGIS-style EWKB geometry values and their binary codec.
//!
//! The decoder is the interesting half: it turns an opaque byte payload
//! (binary column format, or the hex text format Postgres emits for
//! `geometry` columns) into a closed [`Shape`] sum type. The encoder exists
//! so the rest of the workspace can produce canonical bytes for hashing
//! and persistence without depending on a particular byte order.
//!
//! This crate does **not**:
//! - reproject coordinates (SRIDs are carried, never interpreted)
//! - validate topology beyond ring closure
//! - know anything about features or properties (see `lm-schemas`)

pub mod decode;
pub mod encode;
mod error;
mod geojson;

pub use decode::{decode, decode_hex};
pub use encode::{encode, encode_hex};
pub use error::GeometryError;

// ---------------------------------------------------------------------------
// Wire constants
// ---------------------------------------------------------------------------

/// Type-word flag: coordinates carry a Z ordinate.
pub const FLAG_Z: u32 = 0x8000_0000;
/// Type-word flag: coordinates carry an M ordinate.
pub const FLAG_M: u32 = 0x4000_0000;
/// Type-word flag: a 4-byte SRID follows the type word.
pub const FLAG_SRID: u32 = 0x2000_0000;

pub const TYPE_POINT: u8 = 1;
pub const TYPE_LINESTRING: u8 = 2;
pub const TYPE_POLYGON: u8 = 3;
pub const TYPE_MULTIPOINT: u8 = 4;
pub const TYPE_MULTILINESTRING: u8 = 5;
pub const TYPE_MULTIPOLYGON: u8 = 6;
pub const TYPE_GEOMETRYCOLLECTION: u8 = 7;

/// SRID value meaning "no spatial reference attached".
pub const SRID_UNSET: i32 = 0;

// ---------------------------------------------------------------------------
// Byte order
// ---------------------------------------------------------------------------

/// Byte order selected by the leading byte-order mark of an EWKB block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Mark `0` (XDR).
    BigEndian,
    /// Mark `1` (NDR).
    LittleEndian,
}

impl ByteOrder {
    pub fn from_mark(mark: u8) -> Result<Self, GeometryError> {
        match mark {
            0 => Ok(ByteOrder::BigEndian),
            1 => Ok(ByteOrder::LittleEndian),
            other => Err(GeometryError::UnknownByteOrder(other)),
        }
    }

    pub fn mark(self) -> u8 {
        match self {
            ByteOrder::BigEndian => 0,
            ByteOrder::LittleEndian => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Dimensions / coordinates
// ---------------------------------------------------------------------------

/// Which optional ordinates every coordinate of a geometry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub has_z: bool,
    pub has_m: bool,
}

impl Dimensions {
    pub const XY: Dimensions = Dimensions {
        has_z: false,
        has_m: false,
    };
    pub const XYZ: Dimensions = Dimensions {
        has_z: true,
        has_m: false,
    };
    pub const XYM: Dimensions = Dimensions {
        has_z: false,
        has_m: true,
    };
    pub const XYZM: Dimensions = Dimensions {
        has_z: true,
        has_m: true,
    };

    /// Number of doubles per coordinate (2, 3 or 4).
    pub fn ordinates(self) -> usize {
        2 + usize::from(self.has_z) + usize::from(self.has_m)
    }

    pub(crate) fn from_type_word(word: u32) -> Self {
        Dimensions {
            has_z: word & FLAG_Z != 0,
            has_m: word & FLAG_M != 0,
        }
    }

    pub(crate) fn type_flags(self) -> u32 {
        let mut flags = 0;
        if self.has_z {
            flags |= FLAG_Z;
        }
        if self.has_m {
            flags |= FLAG_M;
        }
        flags
    }
}

/// A single position. `z` / `m` are present exactly when the owning
/// geometry's [`Dimensions`] say so.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Coord {
            x,
            y,
            z: None,
            m: None,
        }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: None,
        }
    }

    pub fn xyzm(x: f64, y: f64, z: f64, m: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: Some(m),
        }
    }
}

/// Closed sequence of coordinates (first == last).
pub type Ring = Vec<Coord>;

// ---------------------------------------------------------------------------
// Shape / Geometry
// ---------------------------------------------------------------------------

/// The seven EWKB variants. The set is fixed by the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// `None` is `POINT EMPTY` (encoded as NaN ordinates on the wire).
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    /// First ring is the shell, the rest are holes.
    Polygon(Vec<Ring>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Ring>>),
    GeometryCollection(Vec<Shape>),
}

impl Shape {
    pub fn type_code(&self) -> u8 {
        match self {
            Shape::Point(_) => TYPE_POINT,
            Shape::LineString(_) => TYPE_LINESTRING,
            Shape::Polygon(_) => TYPE_POLYGON,
            Shape::MultiPoint(_) => TYPE_MULTIPOINT,
            Shape::MultiLineString(_) => TYPE_MULTILINESTRING,
            Shape::MultiPolygon(_) => TYPE_MULTIPOLYGON,
            Shape::GeometryCollection(_) => TYPE_GEOMETRYCOLLECTION,
        }
    }

    pub fn type_name(&self) -> &'static str {
        type_name_for_code(self.type_code())
    }

    /// Total number of coordinates, recursively.
    pub fn coord_count(&self) -> usize {
        match self {
            Shape::Point(c) => usize::from(c.is_some()),
            Shape::LineString(cs) | Shape::MultiPoint(cs) => cs.len(),
            Shape::Polygon(rings) => rings.iter().map(Vec::len).sum(),
            Shape::MultiLineString(lines) => lines.iter().map(Vec::len).sum(),
            Shape::MultiPolygon(polys) => polys
                .iter()
                .flat_map(|rings| rings.iter().map(Vec::len))
                .sum(),
            Shape::GeometryCollection(members) => members.iter().map(Shape::coord_count).sum(),
        }
    }
}

pub(crate) fn type_name_for_code(code: u8) -> &'static str {
    match code {
        TYPE_POINT => "Point",
        TYPE_LINESTRING => "LineString",
        TYPE_POLYGON => "Polygon",
        TYPE_MULTIPOINT => "MultiPoint",
        TYPE_MULTILINESTRING => "MultiLineString",
        TYPE_MULTIPOLYGON => "MultiPolygon",
        TYPE_GEOMETRYCOLLECTION => "GeometryCollection",
        _ => "Unknown",
    }
}

/// A decoded geometry: a [`Shape`] plus the SRID and dimensionality that
/// apply uniformly to it and every member it contains.
///
/// Immutable once built; all mutation goes through constructing a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    srid: i32,
    dims: Dimensions,
    shape: Shape,
}

impl Geometry {
    pub fn new(srid: i32, dims: Dimensions, shape: Shape) -> Self {
        Geometry { srid, dims, shape }
    }

    /// 2D geometry without an SRID.
    pub fn xy(shape: Shape) -> Self {
        Geometry::new(SRID_UNSET, Dimensions::XY, shape)
    }

    pub fn with_srid(self, srid: i32) -> Self {
        Geometry { srid, ..self }
    }

    /// Raw SRID; `0` when unset.
    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn has_srid(&self) -> bool {
        self.srid != SRID_UNSET
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn into_shape(self) -> Shape {
        self.shape
    }

    pub fn type_name(&self) -> &'static str {
        self.shape.type_name()
    }

    pub fn coord_count(&self) -> usize {
        self.shape.coord_count()
    }
}
