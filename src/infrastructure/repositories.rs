//! Repository implementations for the supplier import domain
//!
//! Runtime-checked sqlx queries against the SQLite schema created in
//! `database_connection`. JSON-shaped columns (`summary`, `progress`,
//! spec maps, image lists) are serialized through serde_json at this
//! boundary so the rest of the crate works with typed values.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::domain::entities::{
    CanonicalRecord, DiffType, ImportDiffRecord, ImportLog, ImportRun, LogType, Resolution,
    RunProgress, RunStatus, RunSummary, SourceOrigin, StagedRecord, SupplierSource, Template,
};

fn parse_json_map(raw: &str) -> Result<BTreeMap<String, serde_json::Value>> {
    serde_json::from_str(raw).context("Failed to parse spec map column")
}

fn parse_json_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).context("Failed to parse image list column")
}

// ============================================================================
// Templates (including the preparing-pointer lock)
// ============================================================================

#[derive(Clone)]
pub struct TemplateRepository {
    pool: SqlitePool,
}

impl TemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_template(row: &sqlx::sqlite::SqliteRow) -> Result<Template> {
        let part_type: String = row.try_get("part_type")?;
        Ok(Template {
            id: row.try_get("id")?,
            supplier_id: row.try_get("supplier_id")?,
            name: row.try_get("name")?,
            start_url: row.try_get("start_url")?,
            part_type: part_type.parse().map_err(|e: String| anyhow!(e))?,
            auto_approve: row.try_get("auto_approve")?,
            preparing_run_id: row.try_get("preparing_run_id")?,
        })
    }

    pub async fn find(&self, template_id: &str) -> Result<Option<Template>> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_template).transpose()
    }

    pub async fn upsert(&self, template: &Template) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO templates
            (id, supplier_id, name, start_url, part_type, auto_approve, preparing_run_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.id)
        .bind(&template.supplier_id)
        .bind(&template.name)
        .bind(&template.start_url)
        .bind(template.part_type.as_str())
        .bind(template.auto_approve)
        .bind(&template.preparing_run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically claim the preparing pointer for a new run. The
    /// conditional UPDATE is the whole mutual exclusion: only one caller
    /// sees an affected row.
    pub async fn try_acquire_preparing(&self, template_id: &str, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE templates SET preparing_run_id = ? WHERE id = ? AND preparing_run_id IS NULL",
        )
        .bind(run_id)
        .bind(template_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Clear the pointer, but only if this run still owns it.
    pub async fn clear_preparing(&self, template_id: &str, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE templates SET preparing_run_id = NULL WHERE id = ? AND preparing_run_id = ?",
        )
        .bind(template_id)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn preparing_run_id(&self, template_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT preparing_run_id FROM templates WHERE id = ?")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get("preparing_run_id").ok()))
    }
}

// ============================================================================
// Supplier sources
// ============================================================================

#[derive(Clone)]
pub struct SourceRepository {
    pool: SqlitePool,
}

impl SourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record that a URL was (re)discovered or manually seeded. A fresh
    /// row gets `first_seen_at = last_seen_at = now`; an existing row
    /// only refreshes `last_seen_at` (a forced origin is never
    /// downgraded to discovered).
    pub async fn mark_seen(
        &self,
        supplier_id: &str,
        url: &str,
        origin: SourceOrigin,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO supplier_sources (supplier_id, url, origin, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (supplier_id, url) DO UPDATE SET
                last_seen_at = excluded.last_seen_at,
                origin = CASE supplier_sources.origin WHEN 'forced' THEN 'forced' ELSE excluded.origin END
            "#,
        )
        .bind(supplier_id)
        .bind(url)
        .bind(origin.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach the canonical external id once a product was matched.
    pub async fn attach_external_id(
        &self,
        supplier_id: &str,
        url: &str,
        external_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE supplier_sources SET external_id = ? WHERE supplier_id = ? AND url = ?",
        )
        .bind(external_id)
        .bind(supplier_id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, supplier_id: &str) -> Result<Vec<SupplierSource>> {
        let rows = sqlx::query(
            "SELECT * FROM supplier_sources WHERE supplier_id = ? ORDER BY url",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let origin: String = row.try_get("origin")?;
                Ok(SupplierSource {
                    supplier_id: row.try_get("supplier_id")?,
                    url: row.try_get("url")?,
                    external_id: row.try_get("external_id")?,
                    origin: origin.parse().map_err(|e: String| anyhow!(e))?,
                    first_seen_at: row.try_get("first_seen_at")?,
                    last_seen_at: row.try_get("last_seen_at")?,
                })
            })
            .collect()
    }

    pub async fn purge(&self, supplier_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM supplier_sources WHERE supplier_id = ?")
            .bind(supplier_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Staged records
// ============================================================================

#[derive(Clone)]
pub struct StagedRepository {
    pool: SqlitePool,
}

impl StagedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_staged(row: &sqlx::sqlite::SqliteRow) -> Result<StagedRecord> {
        let part_type: String = row.try_get("part_type")?;
        let raw_specs: String = row.try_get("raw_specs")?;
        let norm_specs: String = row.try_get("norm_specs")?;
        let images: String = row.try_get("images")?;
        Ok(StagedRecord {
            supplier_id: row.try_get("supplier_id")?,
            external_id: row.try_get("external_id")?,
            title: row.try_get("title")?,
            part_type: part_type.parse().map_err(|e: String| anyhow!(e))?,
            raw_specs: serde_json::from_str(&raw_specs).context("raw_specs column")?,
            norm_specs: parse_json_map(&norm_specs)?,
            images: parse_json_list(&images)?,
            price_msrp: row.try_get("price_msrp")?,
            price_wholesale: row.try_get("price_wholesale")?,
            availability: row.try_get("availability")?,
            content_hash: row.try_get("content_hash")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }

    /// Overwrite the staged row for this (supplier, external id).
    pub async fn upsert(&self, record: &StagedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO staged_records
            (supplier_id, external_id, title, part_type, raw_specs, norm_specs, images,
             price_msrp, price_wholesale, availability, content_hash, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.supplier_id)
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(record.part_type.as_str())
        .bind(record.raw_specs.to_string())
        .bind(serde_json::to_string(&record.norm_specs)?)
        .bind(serde_json::to_string(&record.images)?)
        .bind(record.price_msrp)
        .bind(record.price_wholesale)
        .bind(&record.availability)
        .bind(&record.content_hash)
        .bind(record.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_all(&self, supplier_id: &str) -> Result<Vec<StagedRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM staged_records WHERE supplier_id = ? ORDER BY external_id",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_staged).collect()
    }

    pub async fn purge(&self, supplier_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM staged_records WHERE supplier_id = ?")
            .bind(supplier_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Canonical store (opaque seam to the durable catalog)
// ============================================================================

/// The durable product catalog outside this core. The diff engine only
/// reads; publish collaborators write through the same seam.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn find(
        &self,
        supplier_id: &str,
        external_id: &str,
    ) -> Result<Option<CanonicalRecord>>;

    async fn find_all(&self, supplier_id: &str) -> Result<Vec<CanonicalRecord>>;

    async fn upsert(&self, record: &CanonicalRecord) -> Result<()>;

    async fn delete(&self, supplier_id: &str, external_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteCanonicalStore {
    pool: SqlitePool,
}

impl SqliteCanonicalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_canonical(row: &sqlx::sqlite::SqliteRow) -> Result<CanonicalRecord> {
        let part_type: String = row.try_get("part_type")?;
        let norm_specs: String = row.try_get("norm_specs")?;
        let images: String = row.try_get("images")?;
        Ok(CanonicalRecord {
            supplier_id: row.try_get("supplier_id")?,
            external_id: row.try_get("external_id")?,
            title: row.try_get("title")?,
            part_type: part_type.parse().map_err(|e: String| anyhow!(e))?,
            norm_specs: parse_json_map(&norm_specs)?,
            images: parse_json_list(&images)?,
            content_hash: row.try_get("content_hash")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CanonicalStore for SqliteCanonicalStore {
    async fn find(
        &self,
        supplier_id: &str,
        external_id: &str,
    ) -> Result<Option<CanonicalRecord>> {
        let row = sqlx::query(
            "SELECT * FROM canonical_records WHERE supplier_id = ? AND external_id = ?",
        )
        .bind(supplier_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_canonical).transpose()
    }

    async fn find_all(&self, supplier_id: &str) -> Result<Vec<CanonicalRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM canonical_records WHERE supplier_id = ? ORDER BY external_id",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_canonical).collect()
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO canonical_records
            (supplier_id, external_id, title, part_type, norm_specs, images, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.supplier_id)
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(record.part_type.as_str())
        .bind(serde_json::to_string(&record.norm_specs)?)
        .bind(serde_json::to_string(&record.images)?)
        .bind(&record.content_hash)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, supplier_id: &str, external_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM canonical_records WHERE supplier_id = ? AND external_id = ?")
            .bind(supplier_id)
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Import runs
// ============================================================================

#[derive(Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<ImportRun> {
        let status: String = row.try_get("status")?;
        let summary: String = row.try_get("summary")?;
        let progress: String = row.try_get("progress")?;
        Ok(ImportRun {
            id: row.try_get("id")?,
            supplier_id: row.try_get("supplier_id")?,
            template_id: row.try_get("template_id")?,
            status: status.parse().map_err(|e: String| anyhow!(e))?,
            summary: serde_json::from_str(&summary).context("summary column")?,
            progress: serde_json::from_str(&progress).context("progress column")?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    pub async fn insert(&self, run: &ImportRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_runs
            (id, supplier_id, template_id, status, summary, progress, started_at, updated_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.supplier_id)
        .bind(&run.template_id)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.summary)?)
        .bind(serde_json::to_string(&run.progress)?)
        .bind(run.started_at)
        .bind(run.updated_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, run_id: &str) -> Result<Option<ImportRun>> {
        let row = sqlx::query("SELECT * FROM import_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    pub async fn update_progress(&self, run_id: &str, progress: &RunProgress) -> Result<()> {
        sqlx::query("UPDATE import_runs SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(progress)?)
            .bind(Utc::now())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_summary(&self, run_id: &str, summary: &RunSummary) -> Result<()> {
        sqlx::query("UPDATE import_runs SET summary = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(summary)?)
            .bind(Utc::now())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let now = Utc::now();
        let finished_at = status.is_terminal().then_some(now);
        sqlx::query(
            "UPDATE import_runs SET status = ?, updated_at = ?, finished_at = COALESCE(?, finished_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(finished_at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Import diffs
// ============================================================================

#[derive(Clone)]
pub struct DiffRepository {
    pool: SqlitePool,
}

impl DiffRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_diff(row: &sqlx::sqlite::SqliteRow) -> Result<ImportDiffRecord> {
        let diff_type: String = row.try_get("diff_type")?;
        let resolution: Option<String> = row.try_get("resolution")?;
        let before: Option<String> = row.try_get("before_json")?;
        let after: Option<String> = row.try_get("after_json")?;
        Ok(ImportDiffRecord {
            id: row.try_get("id")?,
            import_run_id: row.try_get("import_run_id")?,
            external_id: row.try_get("external_id")?,
            diff_type: diff_type.parse().map_err(|e: String| anyhow!(e))?,
            before: before.as_deref().map(serde_json::from_str).transpose()?,
            after: after.as_deref().map(serde_json::from_str).transpose()?,
            resolution: resolution
                .as_deref()
                .map(|s| s.parse::<Resolution>())
                .transpose()
                .map_err(|e| anyhow!(e))?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }

    pub async fn insert_many(&self, diffs: &[ImportDiffRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for diff in diffs {
            sqlx::query(
                r#"
                INSERT INTO import_diffs
                (id, import_run_id, external_id, diff_type, before_json, after_json, resolution, resolved_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&diff.id)
            .bind(&diff.import_run_id)
            .bind(&diff.external_id)
            .bind(diff.diff_type.as_str())
            .bind(diff.before.as_ref().map(|v| v.to_string()))
            .bind(diff.after.as_ref().map(|v| v.to_string()))
            .bind(diff.resolution.map(|r| r.as_str()))
            .bind(diff.resolved_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_for_run(&self, run_id: &str) -> Result<Vec<ImportDiffRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM import_diffs WHERE import_run_id = ? ORDER BY external_id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_diff).collect()
    }

    /// Bulk-approve every unresolved `add` diff for a run. Returns the
    /// number of records transitioned.
    pub async fn approve_all_adds(&self, run_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE import_diffs SET resolution = ?, resolved_at = ?
            WHERE import_run_id = ? AND diff_type = ? AND resolution IS NULL
            "#,
        )
        .bind(Resolution::Approve.as_str())
        .bind(Utc::now())
        .bind(run_id)
        .bind(DiffType::Add.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn resolve_ids(
        &self,
        run_id: &str,
        ids: &[String],
        resolution: Resolution,
    ) -> Result<u64> {
        let mut updated = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE import_diffs SET resolution = ?, resolved_at = ? WHERE import_run_id = ? AND id = ?",
            )
            .bind(resolution.as_str())
            .bind(Utc::now())
            .bind(run_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }
}

// ============================================================================
// Import logs (append-only audit trail)
// ============================================================================

#[derive(Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        template_id: &str,
        run_id: Option<&str>,
        log_type: LogType,
        payload: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO import_logs (template_id, run_id, log_type, payload, at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(run_id)
        .bind(log_type.as_str())
        .bind(payload.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Audit writes are best-effort: failures are logged and swallowed so
    /// they never fail the primary operation.
    pub async fn append_best_effort(
        &self,
        template_id: &str,
        run_id: Option<&str>,
        log_type: LogType,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self.append(template_id, run_id, log_type, payload).await {
            tracing::warn!("Audit log write failed (ignored): {e:#}");
        }
    }

    fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> Result<ImportLog> {
        let log_type: String = row.try_get("log_type")?;
        let payload: String = row.try_get("payload")?;
        Ok(ImportLog {
            id: row.try_get("id")?,
            template_id: row.try_get("template_id")?,
            run_id: row.try_get("run_id")?,
            log_type: log_type.parse().map_err(|e: String| anyhow!(e))?,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            at: row.try_get("at")?,
        })
    }

    /// Log entries for a run newer than the given cursor, oldest first.
    pub async fn tail_after(
        &self,
        run_id: &str,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<ImportLog>> {
        let rows = sqlx::query(
            "SELECT * FROM import_logs WHERE run_id = ? AND id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(run_id)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_log).collect()
    }

    /// Most recent entry of a given type for a template inside a trailing
    /// window, if any. Guard decisions are built on this.
    pub async fn latest_within(
        &self,
        template_id: &str,
        log_type: LogType,
        window_seconds: u64,
    ) -> Result<Option<DateTime<Utc>>> {
        let cutoff = Utc::now() - ChronoDuration::seconds(window_seconds as i64);
        let row = sqlx::query(
            r#"
            SELECT at FROM import_logs
            WHERE template_id = ? AND log_type = ? AND at > ?
            ORDER BY at DESC LIMIT 1
            "#,
        )
        .bind(template_id)
        .bind(log_type.as_str())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.try_get("at").ok()))
    }

    pub async fn purge_for_template(&self, template_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM import_logs WHERE template_id = ?")
            .bind(template_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PartType;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn test_pool() -> SqlitePool {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.pool().clone()
    }

    fn template(id: &str) -> Template {
        Template {
            id: id.to_string(),
            supplier_id: "rainshadow".to_string(),
            name: "Blanks".to_string(),
            start_url: "https://catalog.example-supplier.com/components/blanks".to_string(),
            part_type: PartType::Blank,
            auto_approve: false,
            preparing_run_id: None,
        }
    }

    #[tokio::test]
    async fn preparing_pointer_is_claimed_exactly_once() {
        let pool = test_pool().await;
        let repo = TemplateRepository::new(pool);
        repo.upsert(&template("t1")).await.unwrap();

        assert!(repo.try_acquire_preparing("t1", "run-a").await.unwrap());
        assert!(!repo.try_acquire_preparing("t1", "run-b").await.unwrap());
        assert_eq!(
            repo.preparing_run_id("t1").await.unwrap(),
            Some("run-a".to_string())
        );

        // A run that does not own the pointer cannot clear it
        repo.clear_preparing("t1", "run-b").await.unwrap();
        assert!(repo.preparing_run_id("t1").await.unwrap().is_some());

        repo.clear_preparing("t1", "run-a").await.unwrap();
        assert!(repo.preparing_run_id("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forced_origin_survives_rediscovery() {
        let pool = test_pool().await;
        let repo = SourceRepository::new(pool);
        repo.mark_seen("rainshadow", "https://x/product/1", SourceOrigin::Forced)
            .await
            .unwrap();
        repo.mark_seen("rainshadow", "https://x/product/1", SourceOrigin::Discovered)
            .await
            .unwrap();

        let sources = repo.list("rainshadow").await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].origin, SourceOrigin::Forced);
    }

    #[tokio::test]
    async fn log_guard_window_only_sees_recent_entries() {
        let pool = test_pool().await;
        let repo = LogRepository::new(pool);
        repo.append("t1", None, LogType::RecrawlStarted, serde_json::json!({}))
            .await
            .unwrap();

        let hit = repo
            .latest_within("t1", LogType::RecrawlStarted, 120)
            .await
            .unwrap();
        assert!(hit.is_some());

        let miss = repo
            .latest_within("t1", LogType::PublishInProgress, 120)
            .await
            .unwrap();
        assert!(miss.is_none());
    }
}
