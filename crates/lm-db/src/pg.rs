// Postgres-backed repository.
//
// `save` writes one observation row and upserts the latest-state row in a
// single transaction. The upsert skips rows older than the stored one. Geometry is stored as EWKB `bytea` so the schema does
// not require the PostGIS extension.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lm_schemas::Feature;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{FeatureRow, PersistenceError, Repository};

#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a pool sized to the persistence parallelism so the
    /// repository never sees more concurrent writes than it has connections.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    /// Run embedded SQLx migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("db migrate failed")?;
        tracing::info!("db migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_row(&self, row: &FeatureRow) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            insert into feature_observations (
              layer, feature_id, geometry_type, srid, geometry_ewkb, properties, observed_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7
            )
            "#,
        )
        .bind(&row.layer)
        .bind(&row.feature_id)
        .bind(row.geometry_type)
        .bind(row.srid)
        .bind(&row.geometry_ewkb)
        .bind(&row.properties)
        .bind(row.observed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            insert into features_latest (
              layer, feature_id, geometry_type, srid, geometry_ewkb, properties, observed_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7
            )
            on conflict (layer, feature_id) do update set
              geometry_type = excluded.geometry_type,
              srid          = excluded.srid,
              geometry_ewkb = excluded.geometry_ewkb,
              properties    = excluded.properties,
              observed_at   = excluded.observed_at,
              updated_at    = now()
            where features_latest.observed_at <= excluded.observed_at
            "#,
        )
        .bind(&row.layer)
        .bind(&row.feature_id)
        .bind(row.geometry_type)
        .bind(row.srid)
        .bind(&row.geometry_ewkb)
        .bind(&row.properties)
        .bind(row.observed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
}

#[async_trait::async_trait]
impl Repository for PgRepository {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn save(
        &self,
        layer: &str,
        feature: &Feature,
        observed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let row = FeatureRow::from_feature(layer, feature, observed_at)?;
        self.write_row(&row)
            .await
            .map_err(|e| PersistenceError::Database(e.to_string()))
    }
}
