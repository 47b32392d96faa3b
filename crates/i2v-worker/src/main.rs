//! Image-to-video worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use i2v_media::FfmpegFrameEncoder;
use i2v_storage::UploadThingClient;
use i2v_worker::pipeline::build_pipeline;
use i2v_worker::{
    Generator, HttpJobSource, JobExecutor, JobHandler, JobSource, LocalJobSource, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS); a second
    // install attempt is harmless
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("i2v=info".parse()?)
        .add_directive("hyper=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting i2v-worker");

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    let http = reqwest::Client::new();

    // Load the model once; every job reuses it
    let pipeline = build_pipeline(&config, http.clone())
        .await
        .context("failed to initialize video pipeline")?;

    let encoder =
        Arc::new(FfmpegFrameEncoder::new(config.scratch_dir()).with_crf(config.video_crf));

    let uploader = UploadThingClient::from_env().context("invalid UploadThing configuration")?;
    if !uploader.has_credentials() {
        warn!("UPLOADTHING_API_KEY is not set; every upload will fail");
    }

    let generator = Generator::new(http.clone(), pipeline, encoder, uploader, &config);
    let handler = JobHandler::new(generator);

    let cwd = std::env::current_dir()?;
    let source: Box<dyn JobSource> =
        if let Some(local) = LocalJobSource::from_args(std::env::args().skip(1), &cwd)? {
            info!("Running a single local test job");
            Box::new(local)
        } else if let Some(remote) = HttpJobSource::from_env(http)? {
            info!("Polling the job queue");
            Box::new(remote)
        } else {
            anyhow::bail!(
                "no job source: pass --test_input, provide test_input.json \
                 or set RUNPOD_WEBHOOK_GET_JOB"
            );
        };

    let executor = Arc::new(JobExecutor::new(handler, source, config.job_poll_interval));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    let handled = executor.run().await?;

    info!("Worker shutdown complete ({} job(s) handled)", handled);
    Ok(())
}
