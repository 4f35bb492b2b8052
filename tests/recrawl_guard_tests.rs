//! Orchestrator guard and lifecycle tests
//!
//! Exercises the recrawl mutual-exclusion guards, the preparing-pointer
//! invariant, cancellation, and the purge rate limit against an
//! in-memory database and a canned-page fetcher.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use rodsync::application::orchestrator::{
    ImportOrchestrator, PublishTotals, Publisher, RecrawlOptions,
};
use rodsync::domain::entities::{LogType, PartType, RunStatus, Template};
use rodsync::infrastructure::config::AppConfig;
use rodsync::infrastructure::database_connection::DatabaseConnection;
use rodsync::infrastructure::http_client::{FetchError, PageFetcher};
use rodsync::infrastructure::repositories::{
    LogRepository, RunRepository, SqliteCanonicalStore, TemplateRepository,
};
use rodsync::infrastructure::site_adapter::SelectorSiteAdapter;

const BASE: &str = "https://catalog.example-supplier.com";

struct MockFetcher {
    pages: HashMap<String, String>,
    delay: Option<Duration>,
}

impl MockFetcher {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            delay: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }

    async fn render_html(&self, _url: &str) -> Result<String, FetchError> {
        Err(FetchError::Render("no browser in tests".to_string()))
    }
}

fn listing(products: &[&str]) -> String {
    products
        .iter()
        .map(|p| format!(r#"<div class="product-card"><a href="/product/{p}">{p}</a></div>"#))
        .collect()
}

fn detail(title: &str) -> String {
    format!(
        r#"<h1 class="product-title">{title}</h1>
           <div class="product-description">Casting blank.</div>
           <table class="specs"><tr><td class="label">Power</td><td class="value">MH</td></tr></table>
           <span class="msrp">$99.00</span>"#
    )
}

fn supplier_fixture() -> MockFetcher {
    MockFetcher::new()
        .page(
            &format!("{BASE}/components/blanks"),
            &listing(&["RX-1", "RX-2"]),
        )
        .page(&format!("{BASE}/product/RX-1"), &detail("7'6\" MH F Blank"))
        .page(&format!("{BASE}/product/RX-2"), &detail("7' H F Blank"))
}

async fn build(
    fetcher: MockFetcher,
    publisher: Option<Arc<dyn Publisher>>,
) -> (Arc<ImportOrchestrator>, sqlx::SqlitePool) {
    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let pool = db.pool().clone();

    TemplateRepository::new(pool.clone())
        .upsert(&Template {
            id: "t1".to_string(),
            supplier_id: "rainshadow".to_string(),
            name: "Blanks".to_string(),
            start_url: format!("{BASE}/components/blanks"),
            part_type: PartType::Blank,
            auto_approve: false,
            preparing_run_id: None,
        })
        .await
        .unwrap();

    let orchestrator = Arc::new(ImportOrchestrator::new(
        pool.clone(),
        AppConfig::default(),
        Arc::new(fetcher),
        Arc::new(SelectorSiteAdapter::with_defaults().unwrap()),
        Some(Arc::new(SqliteCanonicalStore::new(pool.clone()))),
        publisher,
    ));
    (orchestrator, pool)
}

#[tokio::test]
async fn recrawl_stages_approves_and_releases_the_lock() {
    let (orchestrator, pool) = build(supplier_fixture(), None).await;

    let outcome = orchestrator
        .request_recrawl(
            "t1",
            RecrawlOptions {
                approve_adds: true,
                publish: false,
                dry_run: false,
            },
        )
        .await
        .unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.goal, Some(2));
    assert!(outcome.publish_totals.is_none());

    let run = RunRepository::new(pool.clone())
        .find(&outcome.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::ReadyToPublish);
    assert_eq!(run.summary.counts.adds, 2);

    // Lock released once the requested work finished
    let pointer = TemplateRepository::new(pool)
        .preparing_run_id("t1")
        .await
        .unwrap();
    assert_eq!(pointer, None);
}

#[tokio::test]
async fn recrawl_is_blocked_while_a_prepare_is_active() {
    let (orchestrator, pool) = build(supplier_fixture(), None).await;

    TemplateRepository::new(pool)
        .try_acquire_preparing("t1", "someone-else")
        .await
        .unwrap();

    let err = orchestrator
        .request_recrawl("t1", RecrawlOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "blocked_prepare");
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn recrawl_is_blocked_during_an_active_publish_window() {
    let (orchestrator, pool) = build(supplier_fixture(), None).await;

    LogRepository::new(pool)
        .append("t1", None, LogType::PublishInProgress, serde_json::json!({}))
        .await
        .unwrap();

    let err = orchestrator
        .request_recrawl("t1", RecrawlOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "blocked_publish");
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn recrawl_cooldown_returns_rate_limit_with_retry_after() {
    let (orchestrator, _pool) = build(supplier_fixture(), None).await;

    orchestrator
        .request_recrawl("t1", RecrawlOptions::default())
        .await
        .unwrap();

    let err = orchestrator
        .request_recrawl("t1", RecrawlOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "rate_limit");
    assert_eq!(err.http_status(), 429);
    assert_eq!(err.retry_after_seconds(), Some(120));
}

#[tokio::test]
async fn publish_failure_surfaces_without_rolling_back_approvals() {
    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _run_id: &str, _supplier_id: &str) -> anyhow::Result<PublishTotals> {
            anyhow::bail!("platform rejected the batch")
        }
    }

    let (orchestrator, pool) = build(supplier_fixture(), Some(Arc::new(FailingPublisher))).await;

    let err = orchestrator
        .request_recrawl(
            "t1",
            RecrawlOptions {
                approve_adds: true,
                publish: true,
                dry_run: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "publish_failed");

    // The failure still released the template lock
    let pointer = TemplateRepository::new(pool)
        .preparing_run_id("t1")
        .await
        .unwrap();
    assert_eq!(pointer, None);
}

#[tokio::test]
async fn cancelled_run_clears_the_preparing_pointer() {
    // Enough slow pages that cancellation lands mid-discovery
    let mut fetcher = MockFetcher::new().with_delay(Duration::from_millis(25));
    fetcher = fetcher.page(&format!("{BASE}/components/blanks"), &listing(&["P1"]));
    for n in 2..=30 {
        let name = format!("P{n}");
        fetcher = fetcher.page(
            &format!("{BASE}/components/blanks?page={n}"),
            &listing(&[name.as_str()]),
        );
    }

    let (orchestrator, pool) = build(fetcher, None).await;

    let started = orchestrator.start_prepare("t1").await.unwrap();
    sleep(Duration::from_millis(60)).await;
    assert!(orchestrator.cancel_run(&started.run_id).await.unwrap());

    let runs = RunRepository::new(pool.clone());
    let mut status = RunStatus::Preparing;
    for _ in 0..100 {
        sleep(Duration::from_millis(20)).await;
        status = runs.find(&started.run_id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
    }
    assert_eq!(status, RunStatus::Cancelled);

    let pointer = TemplateRepository::new(pool)
        .preparing_run_id("t1")
        .await
        .unwrap();
    assert_eq!(pointer, None);
}

#[tokio::test]
async fn concurrent_prepare_start_is_rejected() {
    // Slow pages keep the first cycle in flight while the second starts
    let (orchestrator, _pool) = build(
        supplier_fixture().with_delay(Duration::from_millis(50)),
        None,
    )
    .await;

    let first = orchestrator.start_prepare("t1").await.unwrap();
    assert!(!first.run_id.is_empty());

    let err = orchestrator.start_prepare("t1").await.unwrap_err();
    assert_eq!(err.code(), "blocked_prepare");
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn unknown_template_is_not_found() {
    let (orchestrator, _pool) = build(supplier_fixture(), None).await;
    let err = orchestrator.start_prepare("missing").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn purge_staging_is_rate_limited_per_supplier() {
    let (orchestrator, _pool) = build(supplier_fixture(), None).await;

    for _ in 0..3 {
        orchestrator.purge_staging("rainshadow").await.unwrap();
    }
    let err = orchestrator.purge_staging("rainshadow").await.unwrap_err();
    assert_eq!(err.code(), "rate_limit");

    // A different supplier has its own budget
    orchestrator.purge_staging("other").await.unwrap();
}
