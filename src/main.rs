//! Rodsync service runner
//!
//! Bootstraps logging, configuration, and the database, then executes one
//! command against the import orchestrator. The administrative UI talks
//! to the same facade; this binary exists for operators and cron.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;

use rodsync::application::orchestrator::{ImportOrchestrator, RecrawlOptions};
use rodsync::application::stream::RunStreamService;
use rodsync::domain::events::RunEvent;
use rodsync::infrastructure::config::ConfigManager;
use rodsync::infrastructure::database_connection::DatabaseConnection;
use rodsync::infrastructure::http_client::SupplierFetcher;
use rodsync::infrastructure::logging;
use rodsync::infrastructure::repositories::SqliteCanonicalStore;
use rodsync::infrastructure::site_adapter::SelectorSiteAdapter;

const USAGE: &str = "usage: rodsync <prepare|recrawl|purge-staging|seed|purge-logs> <args...>
  prepare <template-id>
  recrawl <template-id> [--approve] [--publish] [--dry-run]
  purge-staging <supplier-id>
  purge-logs <template-id>
  seed <supplier-id> <url>";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigManager::new()?
        .initialize_on_first_run()
        .await
        .context("Failed to load configuration")?;
    logging::init_logging_with_config(config.logging.clone())?;

    let db = DatabaseConnection::with_max_connections(
        &config.database.url,
        config.database.max_connections,
    )
    .await
    .context("Failed to open database")?;
    db.migrate().await.context("Failed to run migrations")?;
    let pool = db.pool().clone();

    let fetcher = Arc::new(SupplierFetcher::new(&config.crawling)?);
    let adapter = Arc::new(
        SelectorSiteAdapter::with_defaults().map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );
    let canonical = Arc::new(SqliteCanonicalStore::new(pool.clone()));

    let orchestrator = Arc::new(ImportOrchestrator::new(
        pool.clone(),
        config.clone(),
        fetcher,
        adapter,
        Some(canonical),
        None,
    ));
    let streams = RunStreamService::new(pool, config.stream.clone());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("prepare") => {
            let template_id = args.get(1).context(USAGE)?;
            let started = orchestrator
                .start_prepare(template_id)
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            info!(
                "Prepare started: run {} ({} candidates, ~{}s)",
                started.run_id, started.candidate_count, started.eta_seconds
            );
            tail_run(&streams, &started.run_id).await?;
        }
        Some("recrawl") => {
            let template_id = args.get(1).context(USAGE)?;
            let options = RecrawlOptions {
                approve_adds: args.iter().any(|a| a == "--approve"),
                publish: args.iter().any(|a| a == "--publish"),
                dry_run: args.iter().any(|a| a == "--dry-run"),
            };
            let outcome = orchestrator
                .request_recrawl(template_id, options)
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            info!(
                "Recrawl finished: run {} goal={:?} publish={:?}",
                outcome.run_id, outcome.goal, outcome.publish_totals
            );
        }
        Some("purge-staging") => {
            let supplier_id = args.get(1).context(USAGE)?;
            let deleted = orchestrator
                .purge_staging(supplier_id)
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            info!("Purged {} staged records for {}", deleted, supplier_id);
        }
        Some("purge-logs") => {
            let template_id = args.get(1).context(USAGE)?;
            let deleted = orchestrator
                .purge_logs(template_id)
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            info!("Purged {} log entries for {}", deleted, template_id);
        }
        Some("seed") => {
            let supplier_id = args.get(1).context(USAGE)?;
            let url = args.get(2).context(USAGE)?;
            orchestrator
                .seed_source(supplier_id, url)
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            info!("Seeded {} for {}", url, supplier_id);
        }
        _ => bail!(USAGE),
    }

    Ok(())
}

/// Follow a run's progress stream on stdout until the channel ends or
/// the prepare cycle reaches its staged state.
async fn tail_run(streams: &RunStreamService, run_id: &str) -> Result<()> {
    let mut stream = streams
        .stream_run(run_id, "cli", None)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    while let Some(event) = stream.next().await {
        match event {
            RunEvent::Progress(snapshot) => {
                info!(
                    "[{}] {:.0}% {} {}",
                    snapshot.status,
                    snapshot.progress.percent,
                    snapshot.progress.phase,
                    snapshot.progress.details.as_deref().unwrap_or("")
                );
                if snapshot.progress.phase == "staged" {
                    break;
                }
            }
            RunEvent::Log(batch) => {
                for entry in batch.entries {
                    info!("[log] {} {}", entry.log_type, entry.payload);
                }
            }
            RunEvent::Ping { .. } => {}
            RunEvent::Error { code, message } => {
                info!("[error] {code}: {message}");
            }
            RunEvent::End { reason, error } => {
                info!("[end] {reason} {:?}", error);
                break;
            }
        }
    }
    Ok(())
}
