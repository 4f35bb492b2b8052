//! Diff engine
//!
//! Classifies a supplier's full staged set against its canonical set by
//! external identifier and content hash. Equal hashes produce no diff
//! record at all, so rerunning against unchanged data is a no-op apart
//! from the freshly created run.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::application::normalizer::content_hash;
use crate::domain::entities::{
    CanonicalRecord, DiffType, ImportDiffRecord, ImportRun, LogType, RunProgress, RunStatus,
    RunSummary, StagedRecord,
};
use crate::infrastructure::repositories::{
    CanonicalStore, DiffRepository, LogRepository, RunRepository, StagedRepository,
};

fn comparable_staged(record: &StagedRecord) -> serde_json::Value {
    serde_json::json!({
        "title": record.title,
        "part_type": record.part_type,
        "specs": record.norm_specs,
        "images": record.images,
    })
}

fn comparable_canonical(record: &CanonicalRecord) -> serde_json::Value {
    serde_json::json!({
        "title": record.title,
        "part_type": record.part_type,
        "specs": record.norm_specs,
        "images": record.images,
    })
}

/// Hash the diff engine trusts for a canonical record. Records imported
/// before hash tracking get one recomputed from their comparable tuple.
fn canonical_hash(record: &CanonicalRecord) -> String {
    record.content_hash.clone().unwrap_or_else(|| {
        content_hash(
            &record.title,
            record.part_type,
            &record.norm_specs,
            &record.images,
        )
    })
}

pub struct DiffEngine {
    staged: StagedRepository,
    canonical: Option<Arc<dyn CanonicalStore>>,
    runs: RunRepository,
    diffs: DiffRepository,
    logs: LogRepository,
}

impl DiffEngine {
    pub fn new(
        staged: StagedRepository,
        canonical: Option<Arc<dyn CanonicalStore>>,
        runs: RunRepository,
        diffs: DiffRepository,
        logs: LogRepository,
    ) -> Self {
        Self {
            staged,
            canonical,
            runs,
            diffs,
            logs,
        }
    }

    /// Run a standalone diff pass: creates one run, classifies everything,
    /// and returns the run id.
    pub async fn diff(&self, supplier_id: &str, template_id: &str) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.runs
            .insert(&ImportRun {
                id: run_id.clone(),
                supplier_id: supplier_id.to_string(),
                template_id: template_id.to_string(),
                status: RunStatus::Started,
                summary: RunSummary::default(),
                progress: RunProgress {
                    percent: 0.0,
                    phase: "diff".to_string(),
                    details: None,
                },
                started_at: now,
                updated_at: now,
                finished_at: None,
            })
            .await?;
        self.diff_into(&run_id, supplier_id, template_id).await?;
        Ok(run_id)
    }

    /// Classify staged vs canonical into an existing run, writing the
    /// diff records and the run summary. Returns the summary.
    pub async fn diff_into(
        &self,
        run_id: &str,
        supplier_id: &str,
        template_id: &str,
    ) -> Result<RunSummary> {
        let staged = self.staged.find_all(supplier_id).await?;
        // An absent canonical store reads as an empty set, not an error
        let canonical = match &self.canonical {
            Some(store) => store.find_all(supplier_id).await?,
            None => Vec::new(),
        };

        let canonical_by_id: HashMap<&str, &CanonicalRecord> = canonical
            .iter()
            .map(|record| (record.external_id.as_str(), record))
            .collect();

        let mut summary = RunSummary::default();
        let mut records: Vec<ImportDiffRecord> = Vec::new();

        for staged_record in &staged {
            if staged_record.images.is_empty() {
                summary.preflight.missing_images += 1;
            }
            if staged_record.price_wholesale.is_none() {
                summary.preflight.missing_wholesale += 1;
            }

            match canonical_by_id.get(staged_record.external_id.as_str()) {
                None => {
                    summary.counts.adds += 1;
                    records.push(ImportDiffRecord {
                        id: Uuid::new_v4().to_string(),
                        import_run_id: run_id.to_string(),
                        external_id: staged_record.external_id.clone(),
                        diff_type: DiffType::Add,
                        before: None,
                        after: Some(comparable_staged(staged_record)),
                        resolution: None,
                        resolved_at: None,
                    });
                }
                Some(existing) => {
                    if canonical_hash(existing) != staged_record.content_hash {
                        summary.counts.changes += 1;
                        records.push(ImportDiffRecord {
                            id: Uuid::new_v4().to_string(),
                            import_run_id: run_id.to_string(),
                            external_id: staged_record.external_id.clone(),
                            diff_type: DiffType::Change,
                            before: Some(comparable_canonical(existing)),
                            after: Some(comparable_staged(staged_record)),
                            resolution: None,
                            resolved_at: None,
                        });
                    } else {
                        summary.counts.unchanged += 1;
                    }
                }
            }
        }

        let staged_ids: HashMap<&str, ()> = staged
            .iter()
            .map(|record| (record.external_id.as_str(), ()))
            .collect();
        for existing in &canonical {
            if !staged_ids.contains_key(existing.external_id.as_str()) {
                summary.counts.deletes += 1;
                records.push(ImportDiffRecord {
                    id: Uuid::new_v4().to_string(),
                    import_run_id: run_id.to_string(),
                    external_id: existing.external_id.clone(),
                    diff_type: DiffType::Delete,
                    before: Some(comparable_canonical(existing)),
                    after: None,
                    resolution: None,
                    resolved_at: None,
                });
            }
        }

        self.diffs.insert_many(&records).await?;
        self.runs.update_summary(run_id, &summary).await?;
        self.runs.update_status(run_id, RunStatus::Staged).await?;

        self.logs
            .append_best_effort(
                template_id,
                Some(run_id),
                LogType::DiffStaged,
                serde_json::json!({
                    "adds": summary.counts.adds,
                    "changes": summary.counts.changes,
                    "deletes": summary.counts.deletes,
                    "unchanged": summary.counts.unchanged,
                }),
            )
            .await;

        info!(
            "Diff for {} staged: +{} ~{} -{} ={}",
            supplier_id,
            summary.counts.adds,
            summary.counts.changes,
            summary.counts.deletes,
            summary.counts.unchanged
        );

        Ok(summary)
    }
}
