//! lm-config
//!
//! Layered YAML configuration for the live-map services.
//!
//! Documents are deep-merged in order (earlier = base, later = override),
//! checked for literal secrets, canonicalized, hashed (SHA-256), and finally
//! decoded into a typed [`LiveMapConfig`]. Unknown keys are rejected so a
//! typo cannot silently fall back to a default.

pub mod secrets;

pub use secrets::{resolve_secrets, resolve_secrets_with, ResolvedSecrets};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Known secret-like prefixes. Any leaf string starting with one of these
/// aborts loading with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // OpenAI / Stripe style
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
];

/// Connection-string schemes that must never carry inline credentials.
const CREDENTIAL_URL_SCHEMES: &[&str] = &["postgres://", "postgresql://"];

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LiveMapConfig {
    pub layer: LayerConfig,
    pub ingest: IngestConfig,
    pub stream: StreamConfig,
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
}

/// Which feature layer this process serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerConfig {
    /// e.g. `traveltime`, `guidancesign`.
    pub name: String,
    /// Properties excluded from change detection.
    pub volatile_properties: Vec<String>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            name: "traveltime".to_string(),
            volatile_properties: vec!["retrieval_time".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Source endpoint; `None` means no HTTP importer is configured.
    pub url: Option<String>,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_ms: 60_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Minimum spacing between per-feature emissions.
    pub pacing_ms: u64,
    /// Per-subscriber buffer of per-feature events before it is lagged out.
    pub diff_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 5,
            diff_capacity: 1024,
        }
    }
}

impl StreamConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Concurrent repository writes; `0` = available hardware concurrency.
    pub parallelism: usize,
    /// Name of the env var holding the database URL (never the URL itself).
    pub database_url_env: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parallelism: 0,
            database_url_env: "LIVEMAP_DATABASE_URL".to_string(),
        }
    }
}

impl PersistenceConfig {
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("invalid server.bind_addr '{}'", self.bind_addr))
    }
}

impl LiveMapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.layer.name.trim().is_empty() {
            bail!("CONFIG_INVALID: layer.name must not be empty");
        }
        if self.ingest.poll_interval_ms == 0 {
            bail!("CONFIG_INVALID: ingest.poll_interval_ms must be > 0");
        }
        if self.stream.diff_capacity == 0 {
            bail!("CONFIG_INVALID: stream.diff_capacity must be > 0");
        }
        self.server.socket_addr()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
    pub config: LiveMapConfig,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        // An empty document parses as null; treat it as "no overrides".
        if !v_json.is_null() {
            merged = deep_merge(merged, v_json);
        }
    }

    enforce_no_secret_literals(&merged)?;

    let config: LiveMapConfig =
        serde_json::from_value(merged.clone()).context("config does not match schema")?;
    config.validate()?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
        config,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default Map is ordered by key, so compact serialization
    // is already independent of source key order.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if CREDENTIAL_URL_SCHEMES.iter().any(|p| t.starts_with(p)) {
        // user:password@host
        return t.contains('@');
    }
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}
