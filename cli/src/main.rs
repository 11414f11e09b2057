//! hubsync - keeps HubSpot deals, companies and contacts in step with local
//! records.
//!
//! Downloads every kind, runs the configured workflow against the local
//! model, and pushes the resulting diff back through the live API or, in
//! console mode, only logs what would be sent.

mod config;
mod console;
mod error;
mod hubspot;
mod workflow;

use crate::config::{Config, UploaderMode, Workflow};
use crate::console::ConsoleUploader;
use crate::error::{AppError, Result};
use crate::hubspot::HubSpotClient;
use hubsync_engine::{EntityDatabase, Uploader};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubsync=info,hubsync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &AppError) {
    tracing::error!("{err}");
    if let Some(attachment) = err.attachment() {
        tracing::error!(%attachment, "diagnostic payload");
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    tracing::info!(workflow = ?config.workflow, uploader = ?config.uploader, "starting hubsync");

    let report = match config.workflow {
        Workflow::ClassifyEvents => {
            workflow::events::run(&config.data_dir.join("deal-events.json"))?;
            return Ok(());
        }
        Workflow::GenerateCompanies => {
            let mut db = connect(&config).await?;
            workflow::companies::run(
                &mut db,
                &config.data_dir.join("clearbit.json"),
                &config.provider_domains,
            )
            .await?
        }
        Workflow::Sync => {
            let mut db = connect(&config).await?;
            db.sync_up_all_entities().await?
        }
    };

    tracing::info!(report = %serde_json::to_string(&report)?, "run finished");
    Ok(())
}

/// Database wired to the live API for downloads and the configured uploader,
/// with every kind downloaded.
async fn connect(config: &Config) -> Result<EntityDatabase> {
    let client = Arc::new(HubSpotClient::new(
        config.api_base.clone(),
        config.require_access_token()?,
        config.http_timeout,
    )?);

    let uploader: Arc<dyn Uploader> = match config.uploader {
        UploaderMode::Live => client.clone(),
        UploaderMode::Console => Arc::new(ConsoleUploader::new()),
    };

    let mut db = workflow::build_database(config, client, uploader);
    db.download_all_data().await?;
    Ok(db)
}
