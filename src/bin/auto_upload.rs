//! `auto-upload`: push whole directories to DigitalOcean Spaces under
//! metadata-derived keys.

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use spaces_relay::{
    config::{AutoUploadArgs, StorageSettings},
    models::transfer::TransferPolicy,
    services::{
        directory::{report, select_directories, upload_directory},
        spaces::SpacesClient,
        transfer::TransferStrategy,
    },
};
use std::{path::Path, process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let args = AutoUploadArgs::parse();
    let _guard = init_tracing(&args.log_file);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stdout and to `log_file`. The guard flushes the file on drop.
fn init_tracing(log_file: &Path) -> WorkerGuard {
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "upload_log.txt".into());
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    guard
}

async fn run(args: AutoUploadArgs) -> Result<()> {
    let metadata = args.metadata(Local::now().date_naive())?;
    let settings = StorageSettings::from_env().context("Missing DigitalOcean Spaces credentials")?;

    info!("Starting automatic directory upload with metadata:");
    info!("  User: {}", metadata.user);
    info!("  Camera: {}", metadata.camera);
    info!("  Task: {}", metadata.task);
    info!("  Date: {}", metadata.date);

    let client = SpacesClient::connect(&settings).await;
    info!(endpoint = ?client.endpoint(), "Connected to Spaces");
    let strategy = TransferStrategy::new(Arc::new(client), settings.bucket.clone(), TransferPolicy::cli());

    let base_dir = args.resolve_base_dir()?;
    let directories = select_directories(&base_dir, &args.dirs)
        .with_context(|| format!("listing directories in {}", base_dir.display()))?;
    if directories.is_empty() {
        bail!("No directories found to upload");
    }

    info!("Found {} directories to upload:", directories.len());
    for dir in &directories {
        info!("  - {}", dir.file_name().unwrap_or_default().to_string_lossy());
    }

    let mut summaries = Vec::with_capacity(directories.len());
    let mut unreadable = 0usize;
    for dir in &directories {
        info!("{}", "=".repeat(80));
        info!("Processing directory: {}", dir.display());
        info!("{}", "=".repeat(80));

        match upload_directory(&strategy, dir, &metadata).await {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                unreadable += 1;
                error!(directory = %dir.display(), error = %err, "Could not read directory");
            }
        }
    }

    report(&summaries)?;
    if unreadable > 0 {
        bail!("{unreadable} directories could not be read");
    }
    Ok(())
}
