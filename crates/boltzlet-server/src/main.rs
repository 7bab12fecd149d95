//! boltzlet: serve Boltz predictions over HTTP.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use boltzlet::{JobService, JobStore, Settings, UploadStore, transport};

/// Initialize tracing with BOLTZLET_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("BOLTZLET_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "boltzlet={level},boltzlet_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(
        jobs_dir = %settings.jobs_dir.display(),
        uploads_dir = %settings.uploads_dir.display(),
        predictor = %settings.predictor.join(" "),
        timeout_secs = settings.timeout.as_secs(),
        "Loaded settings"
    );

    let store = JobStore::open(&settings.jobs_dir).context("failed to open jobs directory")?;
    let reconciled = store
        .reconcile_stale()
        .context("failed to reconcile stale jobs")?;
    if reconciled > 0 {
        warn!(count = reconciled, "Closed out jobs left running by a previous server");
    }
    let uploads =
        UploadStore::open(&settings.uploads_dir).context("failed to open uploads directory")?;

    let service = Arc::new(JobService::new(store, uploads, settings.service_config()));
    transport::serve(settings.server_config(), service).await
}
