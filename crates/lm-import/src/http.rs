//! HTTP JSON importer.
//!
//! Expects a body of the form
//!
//! ```json
//! { "features": [ { "id": "RWS01_MONIBAS_0041hrl0378ra", "geometry": "0102000020E6...", "properties": { ... } } ] }
//! ```
//!
//! where `geometry` is hex-encoded EWKB. Each wire feature is converted on
//! its own: one with a bad shape (non-scalar property, non-string geometry,
//! missing id) is logged and skipped, and the rest of the batch goes on. A
//! missing or broken hex geometry surfaces later as a decode failure for
//! that single feature.

use std::time::Duration;

use chrono::Utc;
use lm_schemas::{Properties, PropertyValue, RawFeature, RawGeometry, RETRIEVAL_TIME};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{ImportError, Importer};

#[derive(Debug, Clone)]
pub struct HttpImporter {
    http: reqwest::Client,
    url: String,
    stamp_retrieval_time: bool,
}

impl HttpImporter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ImportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImportError::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            stamp_retrieval_time: true,
        })
    }

    /// Disable stamping [`RETRIEVAL_TIME`] on every fetched feature.
    pub fn without_retrieval_stamp(mut self) -> Self {
        self.stamp_retrieval_time = false;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Importer for HttpImporter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_batch(&self) -> Result<Vec<RawFeature>, ImportError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ImportError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ImportError::Api {
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let body: WireCollection = resp
            .json()
            .await
            .map_err(|e| ImportError::Decode(e.to_string()))?;

        let fetched_at = Utc::now();
        let received = body.features.len();
        let mut features = Vec::with_capacity(received);
        for (index, value) in body.features.into_iter().enumerate() {
            let feature_id = wire_id_hint(&value);
            let mut f = match WireFeature::from_value(value) {
                Ok(f) => f,
                Err(reason) => {
                    warn!(
                        url = %self.url,
                        index,
                        feature_id = %feature_id,
                        %reason,
                        "skipping malformed wire feature"
                    );
                    continue;
                }
            };
            if self.stamp_retrieval_time {
                f.properties
                    .insert(RETRIEVAL_TIME.to_string(), PropertyValue::Timestamp(fetched_at));
            }
            features.push(f);
        }

        debug!(
            url = %self.url,
            received,
            count = features.len(),
            "fetched batch"
        );
        Ok(features)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Only the envelope is strict; features are converted one by one.
#[derive(Debug, Deserialize)]
struct WireCollection {
    #[serde(default)]
    features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireFeature {
    id: Value,
    #[serde(default)]
    geometry: Option<String>,
    #[serde(default)]
    properties: Properties,
}

impl WireFeature {
    fn from_value(value: Value) -> Result<RawFeature, String> {
        let wire: WireFeature = serde_json::from_value(value).map_err(|e| e.to_string())?;
        wire.into_raw()
    }

    fn into_raw(self) -> Result<RawFeature, String> {
        let id = match self.id {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => return Err(format!("unusable feature id {other}")),
        };
        Ok(RawFeature {
            id,
            geometry: RawGeometry::Hex(self.geometry.unwrap_or_default()),
            properties: self.properties,
        })
    }
}

/// Best-effort id for log lines about a feature that failed to convert.
fn wire_id_hint(value: &Value) -> String {
    match value.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "<none>".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
