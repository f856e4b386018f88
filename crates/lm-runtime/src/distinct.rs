//! Change detection.
//!
//! A feature passes when its id is new, or when its content hash differs from
//! the one recorded for the id. The hash covers the id, the geometry (as
//! little-endian EWKB) and every property not named volatile.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use lm_geom::ByteOrder;
use lm_schemas::{Feature, PropertyValue, RETRIEVAL_TIME};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Suppress,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// SHA-256 over a feature's non-volatile content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Per-id record of the last content hash judged changed.
///
/// Owned by the ingestion round loop; takes `&mut self` and holds no locks.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    volatile: BTreeSet<String>,
    record: HashMap<String, ContentHash>,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new([RETRIEVAL_TIME])
    }
}

impl ChangeDetector {
    pub fn new<I, S>(volatile: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            volatile: volatile.into_iter().map(Into::into).collect(),
            record: HashMap::new(),
        }
    }

    pub fn is_volatile(&self, property: &str) -> bool {
        self.volatile.contains(property)
    }

    /// Decide pass/suppress and update the record on pass.
    pub fn evaluate(&mut self, feature: &Feature) -> Verdict {
        let h = self.content_hash(feature);
        match self.record.get_mut(&feature.id) {
            Some(stored) if *stored == h => Verdict::Suppress,
            Some(stored) => {
                *stored = h;
                Verdict::Pass
            }
            None => {
                self.record.insert(feature.id.clone(), h);
                Verdict::Pass
            }
        }
    }

    pub fn last_hash(&self, id: &str) -> Option<ContentHash> {
        self.record.get(id).copied()
    }

    /// Number of ids observed so far.
    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    pub fn content_hash(&self, feature: &Feature) -> ContentHash {
        let mut h = Sha256::new();
        put_bytes(&mut h, feature.id.as_bytes());
        put_bytes(
            &mut h,
            &lm_geom::encode(&feature.geometry, ByteOrder::LittleEndian),
        );

        // Properties iterate sorted by name.
        for (name, value) in &feature.properties {
            if self.is_volatile(name) {
                continue;
            }
            put_bytes(&mut h, name.as_bytes());
            put_value(&mut h, value);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&h.finalize());
        ContentHash(out)
    }
}

// Length prefixes keep adjacent fields from running into each other.
fn put_bytes(h: &mut Sha256, bytes: &[u8]) {
    h.update((bytes.len() as u64).to_le_bytes());
    h.update(bytes);
}

fn put_value(h: &mut Sha256, value: &PropertyValue) {
    match value {
        PropertyValue::Null => h.update([0u8]),
        PropertyValue::Boolean(b) => h.update([1u8, *b as u8]),
        PropertyValue::Number(n) => {
            h.update([2u8]);
            h.update(n.to_bits().to_le_bytes());
        }
        PropertyValue::Timestamp(ts) => {
            h.update([3u8]);
            h.update(ts.timestamp().to_le_bytes());
            h.update(ts.timestamp_subsec_nanos().to_le_bytes());
        }
        PropertyValue::String(s) => {
            h.update([4u8]);
            put_bytes(h, s.as_bytes());
        }
    }
}
