//! Fundus Prediction Server
//!
//! Loads one combined model artifact at startup and classifies uploaded
//! fundus photographs over HTTP.

mod app;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::app::DEFAULT_MAX_UPLOAD_MB;
use crate::state::ServiceContext;

/// Fundus Prediction Server
#[derive(Parser, Debug)]
#[command(name = "fundus-server")]
#[command(version)]
#[command(about = "HTTP prediction service for a trained fundus classifier")]
struct Cli {
    /// Combined model artifact (`*_complete.bin`)
    #[arg(short, long, env = "FUNDUS_MODEL_PATH")]
    model: PathBuf,

    /// Host to bind to
    #[arg(long, env = "FUNDUS_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "FUNDUS_PORT", default_value = "5001")]
    port: u16,

    /// Expected label ordering, comma separated. Startup fails on mismatch.
    #[arg(long, env = "FUNDUS_LABELS", value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Largest accepted upload in megabytes
    #[arg(long, env = "FUNDUS_MAX_UPLOAD_MB", default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    info!("Fundus Prediction Server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:    {}", fundus_classifier::backend::backend_name());
    info!("  Model:      {:?}", cli.model);
    info!("  Max upload: {} MB", cli.max_upload_mb);

    let expected = cli.labels.as_ref().map(|labels| {
        labels
            .iter()
            .map(|l| l.trim().to_string())
            .collect::<Vec<_>>()
    });
    let ctx = ServiceContext::load(&cli.model, expected.as_deref())?;

    let [channels, height, width] = ctx.input_shape();
    info!("  Labels:     [{}]", ctx.labels().join(", "));
    info!("  Input:      {}x{}x{}", channels, height, width);

    let app = app::router(Arc::new(ctx), cli.max_upload_mb);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Starting server on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
