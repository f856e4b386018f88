//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `persistence.database_url_env`).
//! Callers resolve them once at startup and pass the result into
//! constructors. Error messages reference the env var name, never the value.

use anyhow::{bail, Result};

use crate::LiveMapConfig;

/// Secrets resolved from the environment. **Values are redacted in `Debug`.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Postgres connection string. `None` when persistence is disabled.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Resolve secrets using the process environment.
pub fn resolve_secrets(cfg: &LiveMapConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, |name| std::env::var(name).ok())
}

/// Resolve secrets with an injectable lookup (tests pass a closure over a map).
///
/// A database URL is required iff persistence is enabled.
pub fn resolve_secrets_with<F>(cfg: &LiveMapConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    if !cfg.persistence.enabled {
        return Ok(ResolvedSecrets { database_url: None });
    }

    let name = cfg.persistence.database_url_env.as_str();
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(url) => Ok(ResolvedSecrets {
            database_url: Some(url),
        }),
        None => bail!(
            "SECRET_MISSING: persistence.enabled=true but env var {} is unset or empty",
            name
        ),
    }
}
