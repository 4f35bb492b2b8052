//! End-to-end stream test: follow a live prepare cycle over the push
//! channel and observe progress snapshots, a log batch, and suppression
//! semantics against a canned supplier site.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_stream::StreamExt;

use rodsync::application::orchestrator::ImportOrchestrator;
use rodsync::application::stream::RunStreamService;
use rodsync::domain::entities::{PartType, Template};
use rodsync::domain::events::RunEvent;
use rodsync::infrastructure::config::{AppConfig, StreamConfig};
use rodsync::infrastructure::database_connection::DatabaseConnection;
use rodsync::infrastructure::http_client::{FetchError, PageFetcher};
use rodsync::infrastructure::repositories::TemplateRepository;
use rodsync::infrastructure::site_adapter::SelectorSiteAdapter;

const BASE: &str = "https://catalog.example-supplier.com";

struct MockFetcher {
    pages: HashMap<String, String>,
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }

    async fn render_html(&self, _url: &str) -> Result<String, FetchError> {
        Err(FetchError::Render("no browser in tests".to_string()))
    }
}

fn fixture() -> MockFetcher {
    let mut pages = HashMap::new();
    pages.insert(
        format!("{BASE}/components/tip-tops"),
        r#"<div class="product-card"><a href="/product/H6">H6</a></div>"#.to_string(),
    );
    pages.insert(
        format!("{BASE}/product/H6"),
        r#"<h1 class="product-title">Heavy Duty Tip Top</h1>
           <span class="sku">H6-5.5</span>
           <table class="specs">
             <tr><td class="label">Tip Size</td><td class="value">6</td></tr>
             <tr><td class="label">Tube Size</td><td class="value">5.5</td></tr>
           </table>"#
            .to_string(),
    );
    MockFetcher { pages }
}

#[tokio::test]
async fn stream_follows_a_prepare_cycle_to_staged() {
    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let pool = db.pool().clone();

    TemplateRepository::new(pool.clone())
        .upsert(&Template {
            id: "tips".to_string(),
            supplier_id: "alps".to_string(),
            name: "Tip Tops".to_string(),
            start_url: format!("{BASE}/components/tip-tops"),
            part_type: PartType::TipTop,
            auto_approve: false,
            preparing_run_id: None,
        })
        .await
        .unwrap();

    let orchestrator = Arc::new(ImportOrchestrator::new(
        pool.clone(),
        AppConfig::default(),
        Arc::new(fixture()),
        Arc::new(SelectorSiteAdapter::with_defaults().unwrap()),
        None,
        None,
    ));

    let started = orchestrator.start_prepare("tips").await.unwrap();
    assert_eq!(started.candidate_count, 1);
    assert!(started.eta_seconds >= 1);

    let streams = RunStreamService::new(
        pool,
        StreamConfig {
            tick_ms: 10,
            ping_every_ticks: 3,
            stuck_after_seconds: 120,
            max_connections_per_class: 4,
        },
    );
    let mut stream = streams.stream_run(&started.run_id, "test", None).unwrap();

    let mut reached_staged = false;
    let mut saw_log_batch = false;

    for _ in 0..200 {
        let Some(event) = stream.next().await else {
            break;
        };
        match event {
            RunEvent::Progress(snapshot) => {
                if snapshot.progress.phase == "staged" {
                    assert_eq!(snapshot.summary.counts.adds, 1);
                    reached_staged = true;
                }
            }
            RunEvent::Log(batch) => {
                saw_log_batch = true;
                assert!(batch.cursor > 0);
            }
            _ => {}
        }
        if reached_staged && saw_log_batch {
            break;
        }
    }

    assert!(reached_staged, "stream never reported the staged phase");
    assert!(saw_log_batch, "diff staging never produced a log batch");
}
