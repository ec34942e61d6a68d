use anyhow::{Context, bail};
use clap::Parser;
use dotenvy::dotenv;
use rust_upload_client::api::error::CoordinatorError;
use rust_upload_client::config::ClientConfig;
use rust_upload_client::models::{FileRef, UploadStatus, UploadTarget};
use rust_upload_client::services::session::AuthSession;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload documents and wait for processing", long_about = None)]
struct Args {
    /// Account email used to log in
    #[arg(short, long)]
    email: String,

    /// Account password (falls back to API_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,

    /// Venture the documents belong to
    #[arg(short, long)]
    venture_id: String,

    /// Document type recorded with every upload
    #[arg(short, long, default_value = "pitch_deck")]
    document_type: String,

    /// API base URL (overrides API_BASE_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_upload_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.api_url.clone() {
        config.api_base_url = url;
    }
    info!(
        "🚀 Uploading {} file(s) to {} (max {}MB, {} checks every {}ms)",
        args.files.len(),
        config.api_base_url,
        config.max_file_size / 1024 / 1024,
        config.max_poll_attempts,
        config.poll_interval_ms
    );

    let password = match args.password.clone() {
        Some(password) => password,
        None => std::env::var("API_PASSWORD").context("No password given and API_PASSWORD is not set")?,
    };

    let session = Arc::new(AuthSession::new());
    let client = rust_upload_client::connect(config, session.clone())?;
    client.auth.login(&args.email, &password).await?;

    let mut logout = session.subscribe_logout();
    tokio::spawn(async move {
        while logout.changed().await.is_ok() {
            let reason = *logout.borrow_and_update();
            if let Some(reason) = reason {
                error!("🔒 Session ended ({:?}); remaining uploads will fail", reason);
            }
        }
    });

    let target = UploadTarget::new(args.venture_id.clone(), args.document_type.clone());
    let mut started = Vec::new();
    let mut rejected = 0usize;

    for path in &args.files {
        let file = FileRef::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let id = client.uploads.add_file(file);

        match client.uploads.confirm(id, target.clone()) {
            Ok(()) => started.push(id),
            Err(CoordinatorError::Validation(e)) => {
                warn!("⛔ {} skipped: {}", path.display(), e.message);
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let uploads = client.uploads.clone();
    let settled = futures::future::join_all(started.iter().map(|id| uploads.settled(*id)));

    let results = tokio::select! {
        results = settled => results,
        _ = shutdown_signal() => {
            client.uploads.teardown();
            client.auth.logout().await;
            bail!("Interrupted; pending uploads cancelled");
        }
    };

    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(task) if task.status == UploadStatus::Completed => {
                info!(
                    "✅ {} processed (document {})",
                    task.file.name,
                    task.document_id.as_deref().unwrap_or("-")
                );
            }
            Ok(task) => {
                failed += 1;
                error!(
                    "❌ {} failed: {}",
                    task.file.name,
                    task.error.as_deref().unwrap_or("unknown error")
                );
            }
            Err(e) => {
                failed += 1;
                error!("❌ {}", e);
            }
        }
    }

    client.auth.logout().await;
    info!(
        "👋 Done: {} completed, {} failed, {} rejected",
        started.len() - failed,
        failed,
        rejected
    );

    if failed > 0 || rejected > 0 {
        bail!("{} upload(s) did not complete", failed + rejected);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, cancelling uploads...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, cancelling uploads...");
        },
    }
}
