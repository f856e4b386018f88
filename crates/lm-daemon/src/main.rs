//! lm-daemon entry point.
//!
//! Loads layered config, wires importer, repository and pipeline for one
//! layer, and serves the HTTP/SSE API. Route handlers live in `routes.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use lm_config::LiveMapConfig;
use lm_daemon::{routes, state};
use lm_db::PgRepository;
use lm_import::HttpImporter;
use lm_runtime::{BroadcastPipeline, PersistenceSink, PipelineSettings};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "lm-daemon", about = "Live feature snapshot and diff broadcaster")]
struct Args {
    /// Config YAML files, merged in order (later overrides earlier).
    #[arg(long = "config", required = true)]
    config: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    // Pin the uptime origin to process start.
    state::uptime_secs();
    init_tracing();

    let args = Args::parse();
    let paths: Vec<&str> = args.config.iter().map(String::as_str).collect();
    let loaded = lm_config::load_layered_yaml(&paths)?;
    // Already validated by the loader.
    let cfg = &loaded.config;
    info!(
        layer = %cfg.layer.name,
        config_hash = %loaded.config_hash,
        "config loaded"
    );

    let secrets = lm_config::resolve_secrets(cfg)?;

    let url = cfg
        .ingest
        .url
        .as_deref()
        .context("CONFIG_INVALID: ingest.url is required")?;
    let importer = HttpImporter::new(url, cfg.ingest.request_timeout())
        .context("failed to build HTTP importer")?;

    let sink = if cfg.persistence.enabled {
        let db_url = secrets
            .database_url
            .as_deref()
            .context("database url missing with persistence enabled")?;
        let parallelism = cfg.persistence.effective_parallelism();
        let repo = PgRepository::connect(db_url, parallelism as u32).await?;
        repo.migrate().await?;
        info!(parallelism, "persistence enabled");
        Some(PersistenceSink::new(&cfg.layer.name, Arc::new(repo), parallelism))
    } else {
        info!("persistence disabled");
        None
    };

    let pipeline = BroadcastPipeline::new(
        PipelineSettings::from_config(cfg),
        Arc::new(importer),
        sink.clone(),
    );
    let (handle, _ingest) = pipeline.spawn(cfg.ingest.poll_interval());

    let shared = Arc::new(state::AppState::new(
        handle,
        sink,
        loaded.config_hash.clone(),
    ));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors(cfg));

    let addr = cfg.server.socket_addr()?;
    info!("lm-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: only the configured origins, read-only methods.
fn cors(cfg: &LiveMapConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .server
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
