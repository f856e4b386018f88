//! Scenario: layered config loading.
//!
//! # Invariants under test
//!
//! 1. Same input => identical hash; key order does not affect the hash.
//! 2. Later layers override earlier ones, field by field.
//! 3. Literal secrets (tokens, credentialed DB URLs) abort loading.
//! 4. Unknown keys and invalid values are rejected.
//! 5. Loading from files matches loading from strings and validates the
//!    merged result.

use std::io::Write;

use lm_config::{load_layered_yaml, load_layered_yaml_from_strings};

const BASE_YAML: &str = r#"
layer:
  name: "traveltime"
  volatile_properties: ["retrieval_time"]
ingest:
  url: "http://localhost:9000/traveltime"
  poll_interval_ms: 60000
stream:
  pacing_ms: 5
persistence:
  enabled: true
  database_url_env: "LIVEMAP_DATABASE_URL"
"#;

const BASE_YAML_REORDERED: &str = r#"
persistence:
  database_url_env: "LIVEMAP_DATABASE_URL"
  enabled: true
stream:
  pacing_ms: 5
ingest:
  poll_interval_ms: 60000
  url: "http://localhost:9000/traveltime"
layer:
  volatile_properties: ["retrieval_time"]
  name: "traveltime"
"#;

const OVERLAY_YAML: &str = r#"
layer:
  name: "guidancesign"
persistence:
  enabled: false
"#;

// ---------------------------------------------------------------------------
// 1. Hash stability
// ---------------------------------------------------------------------------

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

// ---------------------------------------------------------------------------
// 2. Layering
// ---------------------------------------------------------------------------

#[test]
fn overlay_overrides_only_named_fields() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let cfg = loaded.config;

    assert_eq!(cfg.layer.name, "guidancesign");
    assert_eq!(cfg.layer.volatile_properties, vec!["retrieval_time"]);
    assert!(!cfg.persistence.enabled);
    assert_eq!(
        cfg.ingest.url.as_deref(),
        Some("http://localhost:9000/traveltime")
    );
}

// ---------------------------------------------------------------------------
// 3. Secrets
// ---------------------------------------------------------------------------

#[test]
fn literal_token_is_rejected() {
    let yaml = r#"
ingest:
  url: "sk-live-abc123secretvalue"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "{msg}");
    assert!(!msg.contains("abc123"), "secret value must not leak: {msg}");
}

#[test]
fn credentialed_database_url_is_rejected() {
    let yaml = r#"
server:
  cors_origins: ["postgres://livemap:hunter2@db/livemap"]
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
}

// ---------------------------------------------------------------------------
// 4. Schema
// ---------------------------------------------------------------------------

#[test]
fn unknown_key_is_rejected() {
    let yaml = r#"
stream:
  pacing_msec: 10
"#;
    assert!(load_layered_yaml_from_strings(&[yaml]).is_err());
}

#[test]
fn zero_poll_interval_is_rejected() {
    let yaml = r#"
ingest:
  poll_interval_ms: 0
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    assert!(err.to_string().contains("poll_interval_ms"));
}

#[test]
fn bad_bind_addr_is_rejected() {
    let yaml = r#"
server:
  bind_addr: "not-an-addr"
"#;
    assert!(load_layered_yaml_from_strings(&[yaml]).is_err());
}

// ---------------------------------------------------------------------------
// 5. Files
// ---------------------------------------------------------------------------

#[test]
fn files_load_like_strings() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::File::create(&base)
        .unwrap()
        .write_all(BASE_YAML.as_bytes())
        .unwrap();
    std::fs::File::create(&overlay)
        .unwrap()
        .write_all(OVERLAY_YAML.as_bytes())
        .unwrap();

    let from_files = load_layered_yaml(&[
        base.to_str().unwrap(),
        overlay.to_str().unwrap(),
    ])
    .unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_names_the_path() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.yaml"));
}

#[test]
fn file_loading_validates_merged_config() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).unwrap();
    std::fs::write(&overlay, "ingest:\n  poll_interval_ms: 0\n").unwrap();

    let err = load_layered_yaml(&[base.to_str().unwrap(), overlay.to_str().unwrap()])
        .unwrap_err();
    assert!(err.to_string().contains("poll_interval_ms"));
}
