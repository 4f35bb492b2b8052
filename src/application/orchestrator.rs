//! Run orchestrator
//!
//! Owns the per-template import lifecycle:
//! `idle → preparing → started → staged → ready_to_publish → publishing →
//! {published|failed|cancelled}`. The template's `preparing_run_id` is the
//! sole concurrency control for an active crawl/stage cycle; it is claimed
//! with a conditional UPDATE and cleared on every terminal outcome. A
//! stuck pointer permanently blocks its template.
//!
//! Discovery and staging run as a tracked background task. A recrawl
//! request awaits the staged state, then applies optional auto-approve
//! and delegated publish before releasing the lock.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::application::diff::DiffEngine;
use crate::application::discovery::{DiscoveryOptions, PaginatedDiscovery};
use crate::application::normalizer::Normalizer;
use crate::application::rate_limiter::SlidingWindowLimiter;
use crate::domain::entities::{
    ImportRun, LogType, RunProgress, RunStatus, RunSummary, SourceOrigin, Template,
};
use crate::domain::errors::ImportError;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::repositories::{
    CanonicalStore, DiffRepository, LogRepository, RunRepository, SourceRepository,
    StagedRepository, TemplateRepository,
};
use crate::infrastructure::site_adapter::SiteAdapter;

/// Totals reported by the delegated publish collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishTotals {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// External publish collaborator. Publishing approved diffs into the
/// e-commerce platform is outside this core.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, run_id: &str, supplier_id: &str) -> Result<PublishTotals>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecrawlOptions {
    pub approve_adds: bool,
    pub publish: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareStarted {
    pub run_id: String,
    pub candidate_count: u32,
    pub eta_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecrawlOutcome {
    pub ok: bool,
    pub run_id: String,
    pub goal: Option<u64>,
    pub publish_totals: Option<PublishTotals>,
}

/// Which diffs an approval targets.
#[derive(Debug, Clone)]
pub enum DiffSelection {
    AllAdds,
    Ids(Vec<String>),
}

pub struct ImportOrchestrator {
    config: AppConfig,
    fetcher: Arc<dyn PageFetcher>,
    adapter: Arc<dyn SiteAdapter>,
    normalizer: Normalizer,
    templates: TemplateRepository,
    sources: SourceRepository,
    staged: StagedRepository,
    runs: RunRepository,
    diffs: DiffRepository,
    logs: LogRepository,
    canonical: Option<Arc<dyn CanonicalStore>>,
    publisher: Option<Arc<dyn Publisher>>,
    purge_limiter: SlidingWindowLimiter,
    /// Cancellation tokens for in-flight background pipelines, by run id
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl ImportOrchestrator {
    pub fn new(
        pool: SqlitePool,
        config: AppConfig,
        fetcher: Arc<dyn PageFetcher>,
        adapter: Arc<dyn SiteAdapter>,
        canonical: Option<Arc<dyn CanonicalStore>>,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let purge_limiter = SlidingWindowLimiter::new(
            Duration::from_secs(60),
            config.guards.purge_max_per_minute,
        );
        Self {
            config,
            fetcher,
            adapter,
            normalizer: Normalizer::new(),
            templates: TemplateRepository::new(pool.clone()),
            sources: SourceRepository::new(pool.clone()),
            staged: StagedRepository::new(pool.clone()),
            runs: RunRepository::new(pool.clone()),
            diffs: DiffRepository::new(pool.clone()),
            logs: LogRepository::new(pool),
            canonical,
            publisher,
            purge_limiter,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub fn runs(&self) -> &RunRepository {
        &self.runs
    }

    pub fn logs(&self) -> &LogRepository {
        &self.logs
    }

    pub fn templates(&self) -> &TemplateRepository {
        &self.templates
    }

    fn diff_engine(&self) -> DiffEngine {
        DiffEngine::new(
            self.staged.clone(),
            self.canonical.clone(),
            self.runs.clone(),
            self.diffs.clone(),
            self.logs.clone(),
        )
    }

    async fn load_template(&self, template_id: &str) -> Result<Template, ImportError> {
        let template = self
            .templates
            .find(template_id)
            .await
            .map_err(ImportError::Internal)?
            .ok_or_else(|| ImportError::NotFound {
                hint: format!("template {template_id} does not exist"),
            })?;
        if template.start_url.trim().is_empty() {
            return Err(ImportError::MissingConfig {
                hint: format!("template {template_id} has no start URL configured"),
            });
        }
        Ok(template)
    }

    /// Start a prepare/crawl cycle for a template. Returns immediately
    /// with the new run id while discovery and staging continue in the
    /// background.
    pub async fn start_prepare(
        self: &Arc<Self>,
        template_id: &str,
    ) -> Result<PrepareStarted, ImportError> {
        let template = self.load_template(template_id).await?;
        let start = self.adapter.canonicalize_start_url(&template.start_url)?;

        let run_id = Uuid::new_v4().to_string();
        let claimed = self
            .templates
            .try_acquire_preparing(template_id, &run_id)
            .await
            .map_err(ImportError::Internal)?;
        if !claimed {
            return Err(ImportError::BlockedPrepare);
        }

        let now = Utc::now();
        self.runs
            .insert(&ImportRun {
                id: run_id.clone(),
                supplier_id: template.supplier_id.clone(),
                template_id: template.id.clone(),
                status: RunStatus::Preparing,
                summary: RunSummary::default(),
                progress: RunProgress {
                    percent: 0.0,
                    phase: "preparing".to_string(),
                    details: None,
                },
                started_at: now,
                updated_at: now,
                finished_at: None,
            })
            .await
            .map_err(ImportError::Internal)?;

        // Rough client-facing estimate from a probe of the start page
        let candidate_count = match self.fetcher.fetch_html(start.as_str()).await {
            Ok(html) => self.adapter.extract_candidate_urls(&html, &start).len() as u32,
            Err(e) => {
                warn!("Prepare probe of {} failed: {}", start, e);
                0
            }
        };
        let eta_seconds =
            (f64::from(candidate_count) * self.config.crawling.eta_seconds_per_item).ceil() as u64;

        self.spawn_pipeline(template, run_id.clone(), true);

        Ok(PrepareStarted {
            run_id,
            candidate_count,
            eta_seconds,
        })
    }

    /// Recrawl guards, each with its own condition:
    /// active prepare (409), recent publish (409), cooldown (429).
    async fn check_recrawl_guards(&self, template: &Template) -> Result<(), ImportError> {
        if self
            .templates
            .preparing_run_id(&template.id)
            .await
            .map_err(ImportError::Internal)?
            .is_some()
        {
            return Err(ImportError::BlockedPrepare);
        }

        if self
            .logs
            .latest_within(
                &template.id,
                LogType::PublishInProgress,
                self.config.guards.publish_window_seconds,
            )
            .await
            .map_err(ImportError::Internal)?
            .is_some()
        {
            return Err(ImportError::BlockedPublish);
        }

        if self
            .logs
            .latest_within(
                &template.id,
                LogType::RecrawlStarted,
                self.config.guards.recrawl_cooldown_seconds,
            )
            .await
            .map_err(ImportError::Internal)?
            .is_some()
        {
            return Err(ImportError::RateLimited {
                retry_after_seconds: self.config.guards.recrawl_cooldown_seconds,
            });
        }

        Ok(())
    }

    /// Run a full recrawl cycle: crawl + stage + diff, await the staged
    /// state, then optional auto-approve and delegated publish. The
    /// preparing pointer is held until everything requested finished.
    pub async fn request_recrawl(
        self: &Arc<Self>,
        template_id: &str,
        options: RecrawlOptions,
    ) -> Result<RecrawlOutcome, ImportError> {
        let template = self.load_template(template_id).await?;
        self.check_recrawl_guards(&template).await?;

        // This entry is also the cooldown record, so it must not be
        // best-effort: losing it would disable the rate limit.
        self.logs
            .append(
                template_id,
                None,
                LogType::RecrawlStarted,
                serde_json::json!({
                    "approve_adds": options.approve_adds,
                    "publish": options.publish,
                    "dry_run": options.dry_run,
                }),
            )
            .await
            .map_err(ImportError::Internal)?;

        let run_id = Uuid::new_v4().to_string();
        let claimed = self
            .templates
            .try_acquire_preparing(template_id, &run_id)
            .await
            .map_err(ImportError::Internal)?;
        if !claimed {
            // Lost a race between the guard check and the claim
            return Err(ImportError::BlockedPrepare);
        }

        let now = Utc::now();
        self.runs
            .insert(&ImportRun {
                id: run_id.clone(),
                supplier_id: template.supplier_id.clone(),
                template_id: template.id.clone(),
                status: RunStatus::Preparing,
                summary: RunSummary::default(),
                progress: RunProgress {
                    percent: 0.0,
                    phase: "preparing".to_string(),
                    details: None,
                },
                started_at: now,
                updated_at: now,
                finished_at: None,
            })
            .await
            .map_err(ImportError::Internal)?;

        self.spawn_pipeline(template.clone(), run_id.clone(), false);

        if let Err(e) = self.await_staged(&run_id).await {
            self.templates
                .clear_preparing(template_id, &run_id)
                .await
                .ok();
            return Err(e);
        }

        let mut goal = None;
        let mut publish_totals = None;

        if !options.dry_run {
            if options.approve_adds {
                let approved = self
                    .diffs
                    .approve_all_adds(&run_id)
                    .await
                    .map_err(ImportError::Internal)?;
                goal = Some(approved);
                self.runs
                    .update_status(&run_id, RunStatus::ReadyToPublish)
                    .await
                    .map_err(ImportError::Internal)?;
                info!("Auto-approved {} adds for run {}", approved, run_id);
            }

            if options.publish {
                match self.publish_run(&template, &run_id).await {
                    Ok(totals) => publish_totals = Some(totals),
                    Err(e) => {
                        self.templates
                            .clear_preparing(template_id, &run_id)
                            .await
                            .ok();
                        return Err(e);
                    }
                }
            }
        }

        self.templates
            .clear_preparing(template_id, &run_id)
            .await
            .map_err(ImportError::Internal)?;

        Ok(RecrawlOutcome {
            ok: true,
            run_id,
            goal,
            publish_totals,
        })
    }

    async fn await_staged(&self, run_id: &str) -> Result<ImportRun, ImportError> {
        // The pipeline is cooperative and local; a staged result normally
        // lands within seconds. The deadline only guards a wedged crawl.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
        loop {
            let run = self
                .runs
                .find(run_id)
                .await
                .map_err(ImportError::Internal)?
                .ok_or_else(|| ImportError::NotFound {
                    hint: format!("run {run_id} disappeared while preparing"),
                })?;
            match run.status {
                RunStatus::Staged => return Ok(run),
                RunStatus::Failed => {
                    return Err(ImportError::Internal(anyhow!(
                        "run {run_id} failed during prepare"
                    )))
                }
                RunStatus::Cancelled => {
                    return Err(ImportError::Internal(anyhow!(
                        "run {run_id} was cancelled during prepare"
                    )))
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ImportError::Internal(anyhow!(
                    "run {run_id} did not reach staged state in time"
                )));
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    async fn publish_run(
        &self,
        template: &Template,
        run_id: &str,
    ) -> Result<PublishTotals, ImportError> {
        let publisher = self
            .publisher
            .clone()
            .ok_or_else(|| ImportError::PublishFailed {
                hint: "no publish collaborator configured".to_string(),
            })?;

        self.logs
            .append_best_effort(
                &template.id,
                Some(run_id),
                LogType::PublishInProgress,
                serde_json::json!({}),
            )
            .await;
        self.runs
            .update_status(run_id, RunStatus::Publishing)
            .await
            .map_err(ImportError::Internal)?;

        match publisher.publish(run_id, &template.supplier_id).await {
            Ok(totals) => {
                self.runs
                    .update_status(run_id, RunStatus::Published)
                    .await
                    .map_err(ImportError::Internal)?;
                self.logs
                    .append_best_effort(
                        &template.id,
                        Some(run_id),
                        LogType::PublishFinished,
                        serde_json::json!({
                            "created": totals.created,
                            "updated": totals.updated,
                            "skipped": totals.skipped,
                            "failed": totals.failed,
                        }),
                    )
                    .await;
                Ok(totals)
            }
            Err(e) => {
                error!("Publish for run {} failed: {:#}", run_id, e);
                self.runs
                    .update_status(run_id, RunStatus::Failed)
                    .await
                    .map_err(ImportError::Internal)?;
                self.logs
                    .append_best_effort(
                        &template.id,
                        Some(run_id),
                        LogType::PipelineError,
                        serde_json::json!({"step": "publish", "error": e.to_string()}),
                    )
                    .await;
                // Approvals stay; the client retries publish later
                Err(ImportError::PublishFailed {
                    hint: e.to_string(),
                })
            }
        }
    }

    /// Approve diff records for a run.
    pub async fn approve_diffs(
        &self,
        run_id: &str,
        selection: DiffSelection,
    ) -> Result<u64, ImportError> {
        self.runs
            .find(run_id)
            .await
            .map_err(ImportError::Internal)?
            .ok_or_else(|| ImportError::NotFound {
                hint: format!("run {run_id} does not exist"),
            })?;

        let updated = match selection {
            DiffSelection::AllAdds => self
                .diffs
                .approve_all_adds(run_id)
                .await
                .map_err(ImportError::Internal)?,
            DiffSelection::Ids(ids) => self
                .diffs
                .resolve_ids(run_id, &ids, crate::domain::entities::Resolution::Approve)
                .await
                .map_err(ImportError::Internal)?,
        };

        if updated > 0 {
            self.runs
                .update_status(run_id, RunStatus::ReadyToPublish)
                .await
                .map_err(ImportError::Internal)?;
        }
        Ok(updated)
    }

    /// Delete all staged rows for a supplier. Rate limited per supplier.
    pub async fn purge_staging(&self, supplier_id: &str) -> Result<u64, ImportError> {
        if let Err(retry_after_seconds) = self
            .purge_limiter
            .check_and_record(&format!("purge:{supplier_id}"))
        {
            return Err(ImportError::RateLimited {
                retry_after_seconds,
            });
        }
        self.staged
            .purge(supplier_id)
            .await
            .map_err(ImportError::Internal)
    }

    /// Manually seed a supplier source URL.
    pub async fn seed_source(&self, supplier_id: &str, url: &str) -> Result<(), ImportError> {
        Url::parse(url).map_err(|e| ImportError::Validation {
            hint: format!("seed URL does not parse: {e}"),
        })?;
        self.sources
            .mark_seen(supplier_id, url, SourceOrigin::Forced)
            .await
            .map_err(ImportError::Internal)
    }

    /// Drop the audit log for a template.
    pub async fn purge_logs(&self, template_id: &str) -> Result<u64, ImportError> {
        self.logs
            .purge_for_template(template_id)
            .await
            .map_err(ImportError::Internal)
    }

    /// Request out-of-band cancellation of a run. The background task
    /// notices at its next checkpoint.
    pub async fn cancel_run(&self, run_id: &str) -> Result<bool, ImportError> {
        self.runs
            .find(run_id)
            .await
            .map_err(ImportError::Internal)?
            .ok_or_else(|| ImportError::NotFound {
                hint: format!("run {run_id} does not exist"),
            })?;

        let token = self
            .cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(run_id)
            .cloned();
        match token {
            Some(token) => {
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn register_cancellation(&self, run_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(run_id.to_string(), token.clone());
        token
    }

    fn unregister_cancellation(&self, run_id: &str) {
        self.cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(run_id);
    }

    /// Spawn the discover/normalize/stage/diff pipeline as a tracked
    /// background task. `release_lock_on_finish` is set for plain
    /// prepares; recrawls keep holding the pointer through approve and
    /// publish. Failure and cancellation paths always release it.
    fn spawn_pipeline(
        self: &Arc<Self>,
        template: Template,
        run_id: String,
        release_lock_on_finish: bool,
    ) {
        let orchestrator = Arc::clone(self);
        let cancel = self.register_cancellation(&run_id);
        tokio::spawn(async move {
            let outcome = orchestrator
                .run_pipeline(&template, &run_id, &cancel)
                .await;
            orchestrator.unregister_cancellation(&run_id);

            let release = match outcome {
                PipelineOutcome::Staged => release_lock_on_finish,
                PipelineOutcome::Cancelled | PipelineOutcome::Failed => true,
            };
            if release {
                if let Err(e) = orchestrator
                    .templates
                    .clear_preparing(&template.id, &run_id)
                    .await
                {
                    error!(
                        "Failed to clear preparing pointer for template {}: {:#}",
                        template.id, e
                    );
                }
            }
        });
    }

    async fn run_pipeline(
        &self,
        template: &Template,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        match self.pipeline_inner(template, run_id, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Pipeline for run {} failed: {:#}", run_id, e);
                self.logs
                    .append_best_effort(
                        &template.id,
                        Some(run_id),
                        LogType::PipelineError,
                        serde_json::json!({"error": e.to_string()}),
                    )
                    .await;
                if let Err(update_err) = self.runs.update_status(run_id, RunStatus::Failed).await
                {
                    error!("Failed to mark run {} failed: {:#}", run_id, update_err);
                }
                PipelineOutcome::Failed
            }
        }
    }

    async fn mark_cancelled(&self, template: &Template, run_id: &str) -> Result<()> {
        info!("Run {} cancelled", run_id);
        self.logs
            .append_best_effort(
                &template.id,
                Some(run_id),
                LogType::RunCancelled,
                serde_json::json!({}),
            )
            .await;
        self.runs.update_status(run_id, RunStatus::Cancelled).await
    }

    async fn pipeline_inner(
        &self,
        template: &Template,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let discovery = PaginatedDiscovery::new(self.fetcher.clone(), self.adapter.clone());

        self.runs.update_status(run_id, RunStatus::Started).await?;
        self.runs
            .update_progress(
                run_id,
                &RunProgress {
                    percent: 5.0,
                    phase: "discover".to_string(),
                    details: None,
                },
            )
            .await?;

        let outcome = discovery
            .discover_all(
                &template.start_url,
                &DiscoveryOptions {
                    max_pages: self.config.crawling.max_pages,
                },
                cancel,
            )
            .await
            .map_err(|e| anyhow!("discovery rejected start URL: {e}"))?;

        if cancel.is_cancelled() {
            self.mark_cancelled(template, run_id).await?;
            return Ok(PipelineOutcome::Cancelled);
        }

        self.runs
            .update_progress(
                run_id,
                &RunProgress {
                    percent: 30.0,
                    phase: "discover".to_string(),
                    details: Some(format!(
                        "{} urls over {} pages",
                        outcome.urls.len(),
                        outcome.debug.pages_visited
                    )),
                },
            )
            .await?;

        let total = outcome.urls.len().max(1) as f64;
        let mut staged_count = 0u32;

        for (index, url) in outcome.urls.iter().enumerate() {
            if cancel.is_cancelled() {
                self.mark_cancelled(template, run_id).await?;
                return Ok(PipelineOutcome::Cancelled);
            }

            self.sources
                .mark_seen(&template.supplier_id, url, SourceOrigin::Discovered)
                .await
                .ok();

            let Ok(page_url) = Url::parse(url) else {
                continue;
            };
            let html = match self.fetcher.fetch_detail_html(url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Detail fetch of {} failed: {}", url, e);
                    continue;
                }
            };
            let Some(raw) =
                self.adapter
                    .extract_product(&html, &page_url, &template.supplier_id)
            else {
                warn!("No product extracted from {}", url);
                continue;
            };

            let record = self.normalizer.to_staged(&raw, template.part_type);
            self.staged.upsert(&record).await?;
            self.sources
                .attach_external_id(&template.supplier_id, url, &record.external_id)
                .await
                .ok();
            staged_count += 1;

            // 30..90 percent across the detail pass
            let percent = 30.0 + 60.0 * ((index + 1) as f64 / total);
            self.runs
                .update_progress(
                    run_id,
                    &RunProgress {
                        percent,
                        phase: "stage".to_string(),
                        details: Some(format!("{staged_count} records staged")),
                    },
                )
                .await?;
        }

        if cancel.is_cancelled() {
            self.mark_cancelled(template, run_id).await?;
            return Ok(PipelineOutcome::Cancelled);
        }

        self.runs
            .update_progress(
                run_id,
                &RunProgress {
                    percent: 90.0,
                    phase: "diff".to_string(),
                    details: None,
                },
            )
            .await?;

        self.diff_engine()
            .diff_into(run_id, &template.supplier_id, &template.id)
            .await?;

        self.runs
            .update_progress(
                run_id,
                &RunProgress {
                    percent: 100.0,
                    phase: "staged".to_string(),
                    details: Some(format!("{staged_count} records staged")),
                },
            )
            .await?;

        Ok(PipelineOutcome::Staged)
    }
}

enum PipelineOutcome {
    Staged,
    Cancelled,
    Failed,
}
