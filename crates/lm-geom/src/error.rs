use std::fmt;

/// Why a payload could not be decoded as EWKB.
///
/// Every variant means the same thing to callers: the geometry is malformed
/// and the owning feature should be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// The buffer ended before a required value.
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Byte-order mark other than `0` / `1`.
    UnknownByteOrder(u8),
    /// Type word whose variant code (or reserved bits) is not recognised.
    UnknownGeometryType(u32),
    /// A polygon ring whose first and last coordinates differ.
    RingNotClosed { ring: usize },
    /// A polygon ring with fewer than four coordinates.
    RingTooShort { ring: usize, len: usize },
    /// A multi-geometry member of the wrong variant.
    UnexpectedSubGeometry {
        expected: &'static str,
        found: &'static str,
    },
    /// A member declares different Z/M flags than its parent.
    InconsistentDimensions,
    /// `POINT EMPTY` inside a MultiPoint.
    EmptyMember { index: usize },
    /// Collections nested deeper than the decoder allows.
    NestingTooDeep { depth: usize },
    /// Bytes left over after the top-level geometry.
    TrailingBytes { remaining: usize },
    /// Hex text payload that is not valid hex.
    InvalidHex(String),
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "truncated geometry at offset {offset}: needed {needed} byte(s), {available} available"
            ),
            GeometryError::UnknownByteOrder(mark) => {
                write!(f, "unknown byte-order mark {mark:#04x}")
            }
            GeometryError::UnknownGeometryType(word) => {
                write!(f, "unknown geometry type word {word:#010x}")
            }
            GeometryError::RingNotClosed { ring } => write!(f, "ring {ring} is not closed"),
            GeometryError::RingTooShort { ring, len } => {
                write!(f, "ring {ring} has {len} coordinate(s); at least 4 required")
            }
            GeometryError::UnexpectedSubGeometry { expected, found } => {
                write!(f, "expected {expected} member, found {found}")
            }
            GeometryError::InconsistentDimensions => {
                write!(f, "member dimensions differ from parent geometry")
            }
            GeometryError::EmptyMember { index } => {
                write!(f, "multipoint member {index} is empty")
            }
            GeometryError::NestingTooDeep { depth } => {
                write!(f, "geometry nesting exceeds depth {depth}")
            }
            GeometryError::TrailingBytes { remaining } => {
                write!(f, "{remaining} trailing byte(s) after geometry")
            }
            GeometryError::InvalidHex(msg) => write!(f, "invalid hex geometry: {msg}"),
        }
    }
}

impl std::error::Error for GeometryError {}
