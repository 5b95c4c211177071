//! CLI entry point - the composition root.
//!
//! This is the only place where infrastructure is wired together: the
//! SQLite pool, the blob bucket, the engine adapters, and either the
//! HTTP server (`serve`) or the worker pools (`work`).

mod config;
mod parser;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use jimaku_axum::{AppContext, start_server};
use jimaku_core::{TaskStorePort, WorkKind};
use jimaku_db::{SqliteStepCache, SqliteTaskStore, SqliteWorkQueue, setup_database};
use jimaku_pipeline::adapters::ffmpeg::FfmpegSlicer;
use jimaku_pipeline::adapters::openai::OpenAiChat;
use jimaku_pipeline::adapters::whisper_cli::WhisperCliEngine;
use jimaku_pipeline::adapters::ytdlp::YtDlpDownloader;
use jimaku_pipeline::handlers::{DownloadHandler, EnrichHandler, TranscribeHandler};
use jimaku_pipeline::{Coordinator, PipelineSettings, Services};
use jimaku_queue::{WorkHandler, WorkerPool, WorkerPoolConfig};

use config::AppConfig;
use parser::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let services = build_services(&config).await?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.http_port);
            start_server(AppContext::new(services), port).await?;
        }
        Commands::Work { queue, workers } => {
            run_workers(services, &queue, workers).await?;
        }
        Commands::Prune { days } => {
            let removed = services.tasks.prune_completed(days).await?;
            println!("pruned {removed} terminal tasks older than {days} days");
        }
    }

    Ok(())
}

/// Wire every port implementation from the resolved configuration.
async fn build_services(config: &AppConfig) -> anyhow::Result<Arc<Services>> {
    let pool = setup_database(&config.db_path).await?;

    let media = YtDlpDownloader::discover().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "yt-dlp not found on PATH, downloads will fail until installed");
        YtDlpDownloader::new("yt-dlp")
    });
    let speech = WhisperCliEngine::discover(config.model_dir.clone()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "whisperx not found on PATH, transcription will fail until installed");
        WhisperCliEngine::new("whisperx", config.model_dir.clone())
    });
    let slicer = FfmpegSlicer::discover().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ffmpeg/ffprobe not found on PATH, audio chunking will fail");
        FfmpegSlicer::new("ffmpeg", "ffprobe")
    });

    let mut settings = PipelineSettings::new(&config.work_dir, &config.llm_model);
    settings.enrich.model = Some(config.llm_model.clone());

    Ok(Arc::new(Services {
        tasks: Arc::new(SqliteTaskStore::new(pool.clone())),
        blob: Arc::new(jimaku_storage::FsBlobStore::new(&config.blob_root)?),
        cache: Arc::new(SqliteStepCache::new(pool.clone())),
        queue: Arc::new(SqliteWorkQueue::new(pool)),
        media: Arc::new(media),
        speech: Arc::new(speech),
        chat: Arc::new(OpenAiChat::new(
            &config.llm_api_base,
            config.llm_api_key.clone(),
        )),
        slicer: Arc::new(slicer),
        settings,
    }))
}

/// Spawn the selected worker pools and run until ctrl-c.
async fn run_workers(
    services: Arc<Services>,
    queue: &str,
    workers: usize,
) -> anyhow::Result<()> {
    let kinds = selected_kinds(queue)?;
    let coordinator = Arc::new(Coordinator::new(services.clone()));
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    for kind in kinds {
        let handler: Arc<dyn WorkHandler> = match kind {
            WorkKind::Download => {
                Arc::new(DownloadHandler::new(services.clone(), coordinator.clone()))
            }
            WorkKind::Transcribe => {
                Arc::new(TranscribeHandler::new(services.clone(), coordinator.clone()))
            }
            WorkKind::Enrich => {
                Arc::new(EnrichHandler::new(services.clone(), coordinator.clone()))
            }
        };
        let pool = Arc::new(WorkerPool::new(
            services.queue.clone(),
            handler,
            WorkerPoolConfig::default(),
        ));
        handles.extend(pool.spawn(workers, &shutdown));
        tracing::info!(queue = kind.queue_name(), workers, "worker pool started");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down worker pools");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Map the `--queue` flag to work-unit kinds; `default` consumes all.
fn selected_kinds(queue: &str) -> anyhow::Result<Vec<WorkKind>> {
    match queue {
        "download" => Ok(vec![WorkKind::Download]),
        "transcribe" => Ok(vec![WorkKind::Transcribe]),
        "enrich" => Ok(vec![WorkKind::Enrich]),
        "default" | "all" => Ok(vec![
            WorkKind::Download,
            WorkKind::Transcribe,
            WorkKind::Enrich,
        ]),
        other => anyhow::bail!("unknown queue: {other}"),
    }
}
