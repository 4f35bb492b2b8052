// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                supplier_id TEXT NOT NULL,
                name TEXT NOT NULL,
                start_url TEXT NOT NULL,
                part_type TEXT NOT NULL,
                auto_approve BOOLEAN NOT NULL DEFAULT 0,
                preparing_run_id TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS supplier_sources (
                supplier_id TEXT NOT NULL,
                url TEXT NOT NULL,
                external_id TEXT,
                origin TEXT NOT NULL DEFAULT 'discovered',
                first_seen_at DATETIME NOT NULL,
                last_seen_at DATETIME NOT NULL,
                PRIMARY KEY (supplier_id, url)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS staged_records (
                supplier_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                part_type TEXT NOT NULL,
                raw_specs TEXT NOT NULL,
                norm_specs TEXT NOT NULL,
                images TEXT NOT NULL,
                price_msrp REAL,
                price_wholesale REAL,
                availability TEXT,
                content_hash TEXT NOT NULL,
                fetched_at DATETIME NOT NULL,
                PRIMARY KEY (supplier_id, external_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS canonical_records (
                supplier_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                part_type TEXT NOT NULL,
                norm_specs TEXT NOT NULL,
                images TEXT NOT NULL,
                content_hash TEXT,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (supplier_id, external_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS import_runs (
                id TEXT PRIMARY KEY,
                supplier_id TEXT NOT NULL,
                template_id TEXT NOT NULL,
                status TEXT NOT NULL,
                summary TEXT NOT NULL,
                progress TEXT NOT NULL,
                started_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                finished_at DATETIME
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS import_diffs (
                id TEXT PRIMARY KEY,
                import_run_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                diff_type TEXT NOT NULL,
                before_json TEXT,
                after_json TEXT,
                resolution TEXT,
                resolved_at DATETIME,
                FOREIGN KEY (import_run_id) REFERENCES import_runs (id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS import_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id TEXT NOT NULL,
                run_id TEXT,
                log_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_staged_supplier ON staged_records (supplier_id)",
            "CREATE INDEX IF NOT EXISTS idx_canonical_supplier ON canonical_records (supplier_id)",
            "CREATE INDEX IF NOT EXISTS idx_diffs_run ON import_diffs (import_run_id)",
            "CREATE INDEX IF NOT EXISTS idx_logs_template_type ON import_logs (template_id, log_type, at)",
            "CREATE INDEX IF NOT EXISTS idx_logs_run ON import_logs (run_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_runs_template ON import_runs (template_id, started_at)",
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}
