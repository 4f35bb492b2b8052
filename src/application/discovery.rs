//! Paginated discovery driver
//!
//! Walks a supplier's listing pagination, harvesting candidate detail
//! URLs through the site adapter until the page budget is exhausted, a
//! next-page hint loops back, or the page-number heuristic stops growing
//! the result set.
//!
//! The heuristic is deliberately speculative: the candidate next page is
//! fetched and harvested before the walk commits to it, and a single
//! non-growing probe terminates pagination. The wasted fetch on the
//! terminal page is a known trade-off; sites without a reliable rel-next
//! hint depend on this exact behavior for which pages get crawled.
//!
//! Fetch failures never propagate out of the walk. The driver returns
//! whatever was accumulated plus counters.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::domain::errors::ImportError;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::site_adapter::SiteAdapter;

/// Budget for one discovery session.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub max_pages: u32,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self { max_pages: 50 }
    }
}

/// Counters describing how the walk advanced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryDebug {
    /// Pages fetched, including the terminal non-growing probe
    pub pages_visited: u32,
    /// Advances taken via an explicit next-page hint
    pub from_rel_next: u32,
    /// Advances committed via the page-parameter heuristic
    pub from_heuristic: u32,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    /// Sorted, deduplicated candidate URLs
    pub urls: Vec<String>,
    pub debug: DiscoveryDebug,
}

pub struct PaginatedDiscovery {
    fetcher: Arc<dyn PageFetcher>,
    adapter: Arc<dyn SiteAdapter>,
}

impl PaginatedDiscovery {
    pub fn new(fetcher: Arc<dyn PageFetcher>, adapter: Arc<dyn SiteAdapter>) -> Self {
        Self { fetcher, adapter }
    }

    /// Harvest one page's candidate URLs, falling back to a single
    /// headless render when the static markup yields nothing.
    async fn harvest(&self, html: &str, page_url: &Url) -> Vec<String> {
        let links = self.adapter.extract_candidate_urls(html, page_url);
        if !links.is_empty() {
            return links;
        }

        debug!("Static harvest of {} empty, trying headless render", page_url);
        match self.fetcher.render_html(page_url.as_str()).await {
            Ok(rendered) => self.adapter.extract_candidate_urls(&rendered, page_url),
            Err(e) => {
                debug!("Headless render of {} failed: {}", page_url, e);
                Vec::new()
            }
        }
    }

    /// Walk pagination from a validated start URL and return every
    /// candidate URL found, sorted, with walk counters.
    ///
    /// The only error this returns is a validation failure on the start
    /// URL itself; everything after the walk begins degrades to partial
    /// results.
    pub async fn discover_all(
        &self,
        start_url: &str,
        options: &DiscoveryOptions,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome, ImportError> {
        let start = self.adapter.canonicalize_start_url(start_url)?;

        let mut urls: BTreeSet<String> = BTreeSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut dbg = DiscoveryDebug::default();

        let mut current = start.to_string();
        // Page content carried over from a committed heuristic probe so it
        // is neither refetched nor re-rendered.
        let mut prefetched: Option<(String, Vec<String>)> = None;

        loop {
            if cancel.is_cancelled() {
                debug!("Discovery cancelled after {} pages", dbg.pages_visited);
                break;
            }
            if dbg.pages_visited >= options.max_pages && prefetched.is_none() {
                break;
            }
            if !visited.insert(current.clone()) {
                debug!("Already visited {}, stopping", current);
                break;
            }

            let Ok(page_url) = Url::parse(&current) else {
                warn!("Unparseable page URL {} mid-walk", current);
                break;
            };

            let (html, links) = match prefetched.take() {
                Some(carried) => carried,
                None => {
                    let html = match self.fetcher.fetch_html(&current).await {
                        Ok(html) => html,
                        Err(e) => {
                            debug!("Fetch of {} failed, ending pagination: {}", current, e);
                            break;
                        }
                    };
                    dbg.pages_visited += 1;
                    let links = self.harvest(&html, &page_url).await;
                    (html, links)
                }
            };

            for link in links {
                urls.insert(link);
            }

            // Prefer the explicit next-page hint when the site offers one
            if let Some(hint) = self.adapter.next_page_hint(&html, &page_url) {
                if visited.contains(&hint) {
                    break;
                }
                dbg.from_rel_next += 1;
                current = hint;
                continue;
            }

            // Page-number heuristic with a speculative growth probe
            let Some(candidate) = self.adapter.next_page_heuristic(&page_url) else {
                break;
            };
            if visited.contains(&candidate) || dbg.pages_visited >= options.max_pages {
                break;
            }
            let Ok(candidate_url) = Url::parse(&candidate) else {
                break;
            };
            let probe_html = match self.fetcher.fetch_html(&candidate).await {
                Ok(html) => html,
                Err(e) => {
                    debug!("Probe fetch of {} failed, ending pagination: {}", candidate, e);
                    break;
                }
            };
            dbg.pages_visited += 1;
            let probe_links = self.harvest(&probe_html, &candidate_url).await;

            let grew = probe_links.iter().any(|link| !urls.contains(link));
            if !grew {
                debug!("Probe page {} added nothing new, stopping", candidate);
                break;
            }

            dbg.from_heuristic += 1;
            current = candidate;
            prefetched = Some((probe_html, probe_links));
        }

        debug!(
            "Discovery finished: {} urls over {} pages ({} hint, {} heuristic)",
            urls.len(),
            dbg.pages_visited,
            dbg.from_rel_next,
            dbg.from_heuristic
        );

        Ok(DiscoveryOutcome {
            urls: urls.into_iter().collect(),
            debug: dbg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::http_client::FetchError;
    use crate::infrastructure::site_adapter::SelectorSiteAdapter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const BASE: &str = "https://catalog.example-supplier.com";

    /// In-memory fetcher over canned pages, counting every call.
    struct MockFetcher {
        pages: HashMap<String, String>,
        rendered: HashMap<String, String>,
        fetch_counts: Mutex<HashMap<String, u32>>,
        render_counts: Mutex<HashMap<String, u32>>,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                rendered: HashMap::new(),
                fetch_counts: Mutex::new(HashMap::new()),
                render_counts: Mutex::new(HashMap::new()),
            }
        }

        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        fn rendered_page(mut self, url: &str, html: &str) -> Self {
            self.rendered.insert(url.to_string(), html.to_string());
            self
        }

        fn render_count(&self, url: &str) -> u32 {
            *self.render_counts.lock().unwrap().get(url).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
            *self
                .fetch_counts
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_insert(0) += 1;
            self.pages
                .get(url)
                .cloned()
                .ok_or(FetchError::Status(404))
        }

        async fn render_html(&self, url: &str) -> Result<String, FetchError> {
            *self
                .render_counts
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_insert(0) += 1;
            self.rendered
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Render("no browser in tests".to_string()))
        }
    }

    fn listing(products: &[&str], next: Option<&str>) -> String {
        let mut html = String::new();
        for p in products {
            html.push_str(&format!(
                r#"<div class="product-card"><a href="/product/{p}">{p}</a></div>"#
            ));
        }
        if let Some(next) = next {
            html.push_str(&format!(r#"<a rel="next" href="{next}">next</a>"#));
        }
        html
    }

    fn driver(fetcher: MockFetcher) -> (PaginatedDiscovery, Arc<MockFetcher>) {
        let fetcher = Arc::new(fetcher);
        let adapter = Arc::new(SelectorSiteAdapter::with_defaults().unwrap());
        (
            PaginatedDiscovery::new(fetcher.clone(), adapter),
            fetcher,
        )
    }

    #[tokio::test]
    async fn follows_rel_next_chain_and_dedupes() {
        let start = format!("{BASE}/components/blanks");
        let fetcher = MockFetcher::new()
            .page(&start, &listing(&["A", "B"], Some("/components/blanks?page=2")))
            .page(
                &format!("{BASE}/components/blanks?page=2"),
                &listing(&["B", "C"], None),
            )
            // page 2 has no hint; the heuristic probes page 3 and finds nothing new
            .page(
                &format!("{BASE}/components/blanks?page=3"),
                &listing(&["A"], None),
            );

        let (driver, _) = driver(fetcher);
        let outcome = driver
            .discover_all(&start, &DiscoveryOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.urls.len(), 3);
        assert!(outcome.urls.windows(2).all(|w| w[0] < w[1]), "urls sorted");
        assert_eq!(outcome.debug.from_rel_next, 1);
        assert_eq!(outcome.debug.from_heuristic, 0);
        assert_eq!(outcome.debug.pages_visited, 3);
    }

    #[tokio::test]
    async fn heuristic_probe_commits_only_growing_pages() {
        let start = format!("{BASE}/components/guides");
        let fetcher = MockFetcher::new()
            .page(&start, &listing(&["G1", "G2"], None))
            .page(
                &format!("{BASE}/components/guides?page=2"),
                &listing(&["G3"], None),
            )
            .page(
                &format!("{BASE}/components/guides?page=3"),
                &listing(&["G3"], None),
            );

        let (driver, fetcher) = driver(fetcher);
        let outcome = driver
            .discover_all(&start, &DiscoveryOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.urls.len(), 3);
        assert_eq!(outcome.debug.from_heuristic, 1);
        // start, growing probe (page 2), terminal non-growing probe (page 3)
        assert_eq!(outcome.debug.pages_visited, 3);
        // committed probe page is not fetched a second time
        assert_eq!(
            *fetcher
                .fetch_counts
                .lock()
                .unwrap()
                .get(&format!("{BASE}/components/guides?page=2"))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn terminates_within_page_budget_on_endless_growth() {
        let start = format!("{BASE}/components/grips");
        let mut fetcher = MockFetcher::new();
        // Every page grows the set and never offers a hint
        fetcher = fetcher.page(&start, &listing(&["P1"], None));
        for n in 2..=20 {
            fetcher = fetcher.page(
                &format!("{BASE}/components/grips?page={n}"),
                &listing(&[format!("P{n}").as_str()], None),
            );
        }

        let (driver, _) = driver(fetcher);
        let outcome = driver
            .discover_all(
                &start,
                &DiscoveryOptions { max_pages: 5 },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.debug.pages_visited, 5);
        assert_eq!(outcome.urls.len(), 5);
    }

    #[tokio::test]
    async fn never_revisits_a_hinted_loop() {
        let start = format!("{BASE}/components/blanks");
        let second = format!("{BASE}/components/blanks?page=2");
        let fetcher = MockFetcher::new()
            .page(&start, &listing(&["A"], Some("/components/blanks?page=2")))
            .page(&second, &listing(&["B"], Some("/components/blanks")));

        let (driver, _) = driver(fetcher);
        let outcome = driver
            .discover_all(&start, &DiscoveryOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.debug.pages_visited, 2);
        assert_eq!(outcome.urls.len(), 2);
    }

    #[tokio::test]
    async fn off_domain_start_url_is_a_typed_error() {
        let (driver, _) = driver(MockFetcher::new());
        let err = driver
            .discover_all(
                "https://elsewhere.example.com/components/blanks",
                &DiscoveryOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn empty_static_page_falls_back_to_headless_once() {
        let start = format!("{BASE}/components/seats");
        let fetcher = MockFetcher::new()
            .page(&start, "<div id='app'></div>")
            .rendered_page(&start, &listing(&["RS1", "RS2"], None))
            // heuristic probe finds nothing at all
            .page(&format!("{BASE}/components/seats?page=2"), "<div></div>");

        let (driver, fetcher) = driver(fetcher);
        let outcome = driver
            .discover_all(&start, &DiscoveryOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.urls.len(), 2);
        assert_eq!(fetcher.render_count(&start), 1);
    }

    #[tokio::test]
    async fn fetch_failure_returns_partial_results() {
        let start = format!("{BASE}/components/blanks");
        // page 2 is hinted but missing, so its fetch 404s
        let fetcher =
            MockFetcher::new().page(&start, &listing(&["A", "B"], Some("/components/blanks?page=2")));

        let (driver, _) = driver(fetcher);
        let outcome = driver
            .discover_all(&start, &DiscoveryOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.urls.len(), 2);
        assert_eq!(outcome.debug.pages_visited, 1);
        assert_eq!(outcome.debug.from_rel_next, 1);
    }
}
