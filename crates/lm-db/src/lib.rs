//! lm-db
//!
//! Repository boundary for observed features, plus a Postgres implementation
//! (sqlx) and an in-memory one for tests and local runs.
//!
//! The repository is a best-effort mirror: callers log failures and move on.
//! Nothing here retries.

pub mod memory;
pub mod pg;

use std::fmt;

use chrono::{DateTime, Utc};
use lm_geom::ByteOrder;
use lm_schemas::Feature;
use serde_json::Value;

pub use memory::MemoryRepository;
pub use pg::PgRepository;

pub const ENV_DB_URL: &str = "LIVEMAP_DATABASE_URL";

/// Connect to the database named by [`ENV_DB_URL`] and run migrations.
///
/// Used by the ignored DB-backed tests.
pub async fn testkit_repository() -> anyhow::Result<PgRepository> {
    use anyhow::Context;
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let repo = PgRepository::connect(&url, 4).await?;
    repo.migrate().await?;
    Ok(repo)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Driver / connection / constraint failure.
    Database(String),
    /// The feature could not be mapped to a row.
    Rejected { feature_id: String, reason: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Database(msg) => write!(f, "database error: {msg}"),
            PersistenceError::Rejected { feature_id, reason } => {
                write!(f, "feature {feature_id} rejected: {reason}")
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

// ---------------------------------------------------------------------------
// Row shape
// ---------------------------------------------------------------------------

/// Persisted form of one observed feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub layer: String,
    pub feature_id: String,
    pub geometry_type: &'static str,
    pub srid: i32,
    /// Little-endian EWKB, SRID embedded when set.
    pub geometry_ewkb: Vec<u8>,
    pub properties: Value,
    /// Orders saves of the same feature; see [`Repository::save`].
    pub observed_at: DateTime<Utc>,
}

impl FeatureRow {
    pub fn from_feature(
        layer: &str,
        feature: &Feature,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, PersistenceError> {
        let properties =
            serde_json::to_value(&feature.properties).map_err(|e| PersistenceError::Rejected {
                feature_id: feature.id.clone(),
                reason: format!("properties not representable as json: {e}"),
            })?;

        Ok(FeatureRow {
            layer: layer.to_string(),
            feature_id: feature.id.clone(),
            geometry_type: feature.geometry.type_name(),
            srid: feature.geometry.srid(),
            geometry_ewkb: lm_geom::encode(&feature.geometry, ByteOrder::LittleEndian),
            properties,
            observed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Repository trait
// ---------------------------------------------------------------------------

/// Durable store for features judged changed.
///
/// Saves may complete out of order. Every save is recorded as an
/// observation, but the latest-state row only moves forward: a save whose
/// `observed_at` is older than the stored one leaves that row untouched.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    fn name(&self) -> &'static str;

    async fn save(
        &self,
        layer: &str,
        feature: &Feature,
        observed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

/// Observation time for `feature`: its retrieval stamp when present, else
/// `fallback` (typically the time the round submitted it).
pub fn observed_at(feature: &Feature, fallback: DateTime<Utc>) -> DateTime<Utc> {
    feature.retrieval_time().unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lm_geom::{Coord, Geometry, Shape};
    use lm_schemas::RETRIEVAL_TIME;

    #[test]
    fn row_carries_ewkb_and_retrieval_time() {
        let ts: DateTime<Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
        let geom = Geometry::xy(Shape::Point(Some(Coord::xy(1.0, 2.0)))).with_srid(4326);
        let f = Feature::new("sign-7", geom.clone())
            .with_property("text", "A2 Utrecht")
            .with_property(RETRIEVAL_TIME, ts);

        let row =
            FeatureRow::from_feature("guidancesign", &f, observed_at(&f, Utc::now())).unwrap();
        assert_eq!(row.layer, "guidancesign");
        assert_eq!(row.geometry_type, "Point");
        assert_eq!(row.srid, 4326);
        assert_eq!(lm_geom::decode(&row.geometry_ewkb).unwrap(), geom);
        assert_eq!(row.properties["text"], "A2 Utrecht");
        assert_eq!(row.observed_at, ts);
    }

    #[test]
    fn observed_at_falls_back_without_stamp() {
        let fallback: DateTime<Utc> = "2024-05-01T13:00:00Z".parse().unwrap();
        let f = Feature::new("sign-7", Geometry::xy(Shape::Point(None)));
        assert_eq!(observed_at(&f, fallback), fallback);
    }

    #[test]
    fn persistence_error_display() {
        let err = PersistenceError::Rejected {
            feature_id: "x".to_string(),
            reason: "nan".to_string(),
        };
        assert_eq!(err.to_string(), "feature x rejected: nan");
    }
}
