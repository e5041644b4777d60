//! filepipe-worker: run ingestion jobs from the command line.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use filepipe_core::{BlobLocator, FileId, NewFile};
use filepipe_infra::config::IngestConfig;
use filepipe_infra::jobs::{JobId, JobQueue, JobState, spawn_lifecycle_logger};
use filepipe_infra::{
    FileProcessor, InMemoryMetadataStore, LocalBlobStore, MetadataStore, PostgresMetadataStore,
    ProcessingService,
};

#[derive(Debug, Parser)]
#[command(name = "filepipe-worker", version, about = "Stream stored files into line records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the metadata tables (requires DATABASE_URL)
    Migrate,
    /// Register objects from BLOB_BUCKET and process them
    Ingest {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Process files that are already registered
    Process {
        #[arg(required = true)]
        file_ids: Vec<FileId>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match IngestConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    filepipe_observability::init(&config.log);

    match run(cli.command, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{err:#}"), "worker failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns `false` when any requested file did not process cleanly.
async fn run(command: Command, config: IngestConfig) -> Result<bool> {
    for key in IngestConfig::missing_recommended(|k| std::env::var(k).ok()) {
        warn!(key, "recommended setting is not set");
    }

    if let Command::Migrate = command {
        let store = connect_postgres(&config).await?;
        store.ensure_schema().await?;
        return Ok(true);
    }

    let metadata: Arc<dyn MetadataStore> = if config.database_url.is_some() {
        let store = connect_postgres(&config).await?;
        store.ensure_schema().await?;
        Arc::new(store)
    } else {
        warn!("DATABASE_URL not set; using in-memory metadata store");
        Arc::new(InMemoryMetadataStore::new())
    };
    let blobs = Arc::new(LocalBlobStore::new(&config.blob_root));

    let processor = FileProcessor::new(
        blobs.clone(),
        metadata.clone(),
        config.processor_settings(),
    );
    let queue = JobQueue::spawn(config.queue_config(), processor)?;
    let logger = spawn_lifecycle_logger(queue.subscribe());
    let service = ProcessingService::new(queue, metadata);

    let mut requested: Vec<(FileId, Option<JobId>)> = Vec::new();
    let mut ok = true;

    match command {
        Command::Migrate => {}
        Command::Ingest { keys } => {
            for key in keys {
                let locator = BlobLocator::new(config.blob_bucket.clone(), key.clone());
                let mut new = NewFile::new(locator.clone()).with_original_name(key.as_str());
                if let Ok(meta) = tokio::fs::metadata(blobs.path_for(&locator)?).await {
                    new = new.with_size(meta.len());
                }
                let record = service.register_file(new).await?;
                requested.push(request(&service, record.file_id).await);
            }
        }
        Command::Process { file_ids } => {
            for file_id in file_ids {
                requested.push(request(&service, file_id).await);
            }
        }
    }

    service.queue().wait_idle().await?;

    for (file_id, job_id) in requested {
        let Some(job_id) = job_id else {
            ok = false;
            continue;
        };
        let job = service.job(&job_id).await?;
        let file = service.file(&file_id).await?;
        if job.state != JobState::Succeeded {
            ok = false;
        }

        let line = serde_json::json!({
            "fileId": file_id,
            "jobId": job.id,
            "state": job.state,
            "attempts": job.attempts,
            "error": job.error,
            "status": file.status,
            "processedLines": file.processed_lines,
        });
        println!("{line}");
    }

    drop(service);
    logger.await.context("lifecycle logger task")?;
    info!(ok, "worker finished");
    Ok(ok)
}

async fn request(service: &ProcessingService, file_id: FileId) -> (FileId, Option<JobId>) {
    match service.request_processing(&file_id).await {
        Ok(job) => (file_id, Some(job.id)),
        Err(err) => {
            let line = serde_json::json!({
                "fileId": file_id,
                "error": err.to_string(),
            });
            println!("{line}");
            (file_id, None)
        }
    }
}

async fn connect_postgres(config: &IngestConfig) -> Result<PostgresMetadataStore> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL must be set for this command");
    };
    PostgresMetadataStore::connect(url)
        .await
        .context("connecting to Postgres")
}
