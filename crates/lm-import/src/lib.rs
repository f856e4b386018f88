//! lm-import
//!
//! Importer boundary: a source of raw feature batches pulled once per
//! ingestion round.
//!
//! This crate owns the [`Importer`] trait and two concrete sources. It does
//! **not** decode geometry, detect changes, or persist anything; the runtime
//! pipeline does that with whatever a source returns.

pub mod http;
pub mod scripted;

use std::fmt;
use std::sync::Arc;

use lm_schemas::RawFeature;

pub use http::HttpImporter;
pub use scripted::ScriptedImporter;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors an [`Importer`] may return for a whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream endpoint answered with a non-success status.
    Api { status: u16, message: String },
    /// The response payload could not be decoded.
    Decode(String),
    /// The importer is misconfigured (bad URL, client build failure).
    Config(String),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Transport(msg) => write!(f, "transport error: {msg}"),
            ImportError::Api { status, message } => {
                write!(f, "source api error status={status}: {message}")
            }
            ImportError::Decode(msg) => write!(f, "decode error: {msg}"),
            ImportError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ImportError {}

// ---------------------------------------------------------------------------
// Importer trait
// ---------------------------------------------------------------------------

/// Pull-based source of raw feature batches.
///
/// Best-effort contract: an empty batch means "nothing new", not an error.
/// Only a failure to obtain a batch at all is reported as `Err`.
#[async_trait::async_trait]
pub trait Importer: Send + Sync {
    /// Short name for logs (e.g. `"http"`).
    fn name(&self) -> &'static str;

    async fn fetch_batch(&self) -> Result<Vec<RawFeature>, ImportError>;
}

#[async_trait::async_trait]
impl<T: Importer + ?Sized> Importer for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn fetch_batch(&self) -> Result<Vec<RawFeature>, ImportError> {
        (**self).fetch_batch().await
    }
}

#[async_trait::async_trait]
impl<T: Importer + ?Sized> Importer for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn fetch_batch(&self) -> Result<Vec<RawFeature>, ImportError> {
        (**self).fetch_batch().await
    }
}
