//! lm-schemas
//!
//! Shared feature types used across the workspace: the raw shape the importer
//! hands over, the decoded [`Feature`], and the insertion-ordered
//! [`FeatureSet`] that represents "the world as last known" for one layer.
//!
//! No I/O and no change detection live here.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use lm_geom::{Geometry, GeometryError};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Deserializer, Serialize};

/// Property stamped by importers with the time a feature was fetched.
/// Changes on every observation, so change detection ignores it by default.
pub const RETRIEVAL_TIME: &str = "retrieval_time";

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Heterogeneous scalar property value.
///
/// Untagged on the wire. Incoming JSON strings always stay
/// [`PropertyValue::String`], even when they look like RFC 3339, so text is
/// published exactly as the source sent it. `Timestamp` is only produced by
/// code that stamps a typed time (importers setting [`RETRIEVAL_TIME`]) and
/// serializes as RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    String(String),
}

/// Accepted wire shapes. No timestamp arm: see [`PropertyValue`].
#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match WireValue::deserialize(deserializer)? {
            WireValue::Null => PropertyValue::Null,
            WireValue::Boolean(b) => PropertyValue::Boolean(b),
            WireValue::Number(n) => PropertyValue::Number(n),
            WireValue::String(s) => PropertyValue::String(s),
        })
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Number(n as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(ts: DateTime<Utc>) -> Self {
        PropertyValue::Timestamp(ts)
    }
}

/// Property name -> value, sorted by name so iteration order is stable.
pub type Properties = BTreeMap<String, PropertyValue>;

// ---------------------------------------------------------------------------
// Raw (importer-side) feature
// ---------------------------------------------------------------------------

/// Geometry payload exactly as delivered by the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawGeometry {
    /// Binary EWKB.
    Binary(Vec<u8>),
    /// Hex-encoded EWKB (Postgres text format).
    Hex(String),
}

impl RawGeometry {
    pub fn decode(&self) -> Result<Geometry, GeometryError> {
        match self {
            RawGeometry::Binary(bytes) => lm_geom::decode(bytes),
            RawGeometry::Hex(text) => lm_geom::decode_hex(text),
        }
    }
}

/// One feature as produced by an importer, geometry still undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub id: String,
    pub geometry: RawGeometry,
    pub properties: Properties,
}

impl RawFeature {
    pub fn decode(self) -> Result<Feature, GeometryError> {
        let geometry = self.geometry.decode()?;
        Ok(Feature {
            id: self.id,
            geometry,
            properties: self.properties,
        })
    }
}

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

/// A decoded feature: stable identity, geometry, and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub geometry: Geometry,
    pub properties: Properties,
}

impl Feature {
    pub fn new(id: impl Into<String>, geometry: Geometry) -> Self {
        Feature {
            id: id.into(),
            geometry,
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// The importer's fetch timestamp, if it stamped one.
    ///
    /// Also accepts RFC 3339 text, the form a stamp takes after a JSON
    /// round trip.
    pub fn retrieval_time(&self) -> Option<DateTime<Utc>> {
        match self.properties.get(RETRIEVAL_TIME) {
            Some(PropertyValue::Timestamp(ts)) => Some(*ts),
            Some(PropertyValue::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Feature", 4)?;
        st.serialize_field("type", "Feature")?;
        st.serialize_field("id", &self.id)?;
        st.serialize_field("geometry", &self.geometry)?;
        st.serialize_field("properties", &self.properties)?;
        st.end()
    }
}

// ---------------------------------------------------------------------------
// FeatureSet
// ---------------------------------------------------------------------------

/// Insertion-ordered map from feature id to the latest observed feature.
///
/// At most one entry per id. Replacing an existing id keeps its original
/// position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    features: Vec<Feature>,
    index: HashMap<String, usize>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.index.get(id).map(|&i| &self.features[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert or replace by id. Returns `true` when the id was new.
    pub fn upsert(&mut self, feature: Feature) -> bool {
        match self.index.get(&feature.id) {
            Some(&i) => {
                self.features[i] = feature;
                false
            }
            None => {
                self.index.insert(feature.id.clone(), self.features.len());
                self.features.push(feature);
                true
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.id.as_str())
    }
}

impl<'a> IntoIterator for &'a FeatureSet {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Extend<Feature> for FeatureSet {
    fn extend<I: IntoIterator<Item = Feature>>(&mut self, iter: I) {
        for f in iter {
            self.upsert(f);
        }
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        let mut set = FeatureSet::new();
        set.extend(iter);
        set
    }
}

impl Serialize for FeatureSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("FeatureCollection", 2)?;
        st.serialize_field("type", "FeatureCollection")?;
        st.serialize_field("features", &self.features)?;
        st.end()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
