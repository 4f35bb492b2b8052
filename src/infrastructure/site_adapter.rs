//! Site-specific link extraction and product parsing
//!
//! Supplier site markup differs per vendor, so everything markup-shaped is
//! concentrated behind the [`SiteAdapter`] trait. The provided
//! [`SelectorSiteAdapter`] is configured entirely through CSS selectors and
//! covers the common listing/detail layout; a new supplier usually needs a
//! new [`SiteAdapterConfig`], not a new adapter.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::domain::entities::RawProduct;
use crate::domain::errors::ImportError;

/// CSS selector configuration for one supplier site.
#[derive(Debug, Clone)]
pub struct SiteAdapterConfig {
    /// Base URL; discovery rejects start URLs on any other host
    pub base_url: String,
    /// Path prefix discovery is allowed to walk
    pub allowed_path_prefix: String,
    /// Selector for product detail links on listing pages
    pub detail_link_selector: String,
    /// Selector for the explicit next-page hint
    pub next_link_selector: String,
    /// Query parameter used by the page-number heuristic
    pub page_param: String,
    /// Detail page: product title
    pub title_selector: String,
    /// Detail page: long description
    pub description_selector: String,
    /// Detail page: spec table rows
    pub spec_row_selector: String,
    /// Spec row: label cell
    pub spec_label_selector: String,
    /// Spec row: value cell
    pub spec_value_selector: String,
    /// Detail page: SKU/model code
    pub sku_selector: String,
    /// Detail page: product images
    pub image_selector: String,
    /// Detail page: MSRP price
    pub price_msrp_selector: String,
    /// Detail page: wholesale/dealer price
    pub price_wholesale_selector: String,
    /// Detail page: availability note
    pub availability_selector: String,
}

impl Default for SiteAdapterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://catalog.example-supplier.com".to_string(),
            allowed_path_prefix: "/components".to_string(),
            detail_link_selector:
                "a[href*='/product/'], .product-card a, .product-list-item a.detail".to_string(),
            next_link_selector: "link[rel='next'], a[rel='next'], .pagination a.next".to_string(),
            page_param: "page".to_string(),
            title_selector: "h1.product-title, h1".to_string(),
            description_selector: ".product-description, #description, .desc".to_string(),
            spec_row_selector: "table.specs tr, .spec-table tr".to_string(),
            spec_label_selector: "th, td.label, td:nth-child(1)".to_string(),
            spec_value_selector: "td.value, td:nth-child(2)".to_string(),
            sku_selector: ".sku, .model-code, span[itemprop='sku']".to_string(),
            image_selector: ".product-gallery img, .product-image img".to_string(),
            price_msrp_selector: ".price-msrp, .msrp, span[itemprop='price']".to_string(),
            price_wholesale_selector: ".price-wholesale, .dealer-price".to_string(),
            availability_selector: ".availability, .stock-status".to_string(),
        }
    }
}

/// Site-specific extraction rules used by the discovery driver and the
/// detail collection stage.
pub trait SiteAdapter: Send + Sync {
    /// Candidate detail URLs harvested from a listing page's markup.
    fn extract_candidate_urls(&self, html: &str, page_url: &Url) -> Vec<String>;

    /// Explicit "next page" hint resolved from a link relation, if any.
    fn next_page_hint(&self, html: &str, page_url: &Url) -> Option<String>;

    /// Heuristic next-page candidate: increment the page-number parameter.
    fn next_page_heuristic(&self, page_url: &Url) -> Option<String>;

    /// Validate and canonicalize a discovery start URL. Off-domain or
    /// off-path inputs are rejected before any fetch happens.
    fn canonicalize_start_url(&self, raw: &str) -> Result<Url, ImportError>;

    /// External identifier derived from a detail URL.
    fn external_id_for(&self, url: &Url) -> Option<String>;

    /// Parse one detail page into a raw product.
    fn extract_product(&self, html: &str, page_url: &Url, supplier_id: &str)
        -> Option<RawProduct>;
}

/// Generic selector-driven adapter.
pub struct SelectorSiteAdapter {
    config: SiteAdapterConfig,
    detail_link: Selector,
    next_link: Selector,
    title: Selector,
    description: Selector,
    spec_row: Selector,
    spec_label: Selector,
    spec_value: Selector,
    sku: Selector,
    image: Selector,
    price_msrp: Selector,
    price_wholesale: Selector,
    availability: Selector,
}

impl SelectorSiteAdapter {
    pub fn new(config: SiteAdapterConfig) -> Result<Self, ImportError> {
        let parse = |s: &str| {
            Selector::parse(s).map_err(|e| ImportError::Validation {
                hint: format!("invalid selector '{s}': {e}"),
            })
        };

        Ok(Self {
            detail_link: parse(&config.detail_link_selector)?,
            next_link: parse(&config.next_link_selector)?,
            title: parse(&config.title_selector)?,
            description: parse(&config.description_selector)?,
            spec_row: parse(&config.spec_row_selector)?,
            spec_label: parse(&config.spec_label_selector)?,
            spec_value: parse(&config.spec_value_selector)?,
            sku: parse(&config.sku_selector)?,
            image: parse(&config.image_selector)?,
            price_msrp: parse(&config.price_msrp_selector)?,
            price_wholesale: parse(&config.price_wholesale_selector)?,
            availability: parse(&config.availability_selector)?,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self, ImportError> {
        Self::new(SiteAdapterConfig::default())
    }

    fn base(&self) -> Option<Url> {
        Url::parse(&self.config.base_url).ok()
    }

    /// Resolve an href against the page it appeared on and keep it only
    /// when it stays on the allowed host and path prefix.
    fn resolve_in_scope(&self, href: &str, page_url: &Url) -> Option<String> {
        let resolved = page_url.join(href).ok()?;
        let base = self.base()?;
        if resolved.host_str() != base.host_str() {
            return None;
        }
        if !resolved.path().starts_with(&self.config.allowed_path_prefix)
            && !resolved.path().starts_with("/product/")
        {
            return None;
        }
        let mut canonical = resolved;
        canonical.set_fragment(None);
        Some(canonical.to_string())
    }

    fn text_of(html: &Html, selector: &Selector) -> Option<String> {
        html.select(selector).next().map(|el| {
            el.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    fn price_of(html: &Html, selector: &Selector) -> Option<f64> {
        Self::text_of(html, selector).and_then(|raw| parse_price(&raw))
    }
}

/// Parse a money string like `"$123.45"` or `"1,299.00 USD"`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

impl SiteAdapter for SelectorSiteAdapter {
    fn extract_candidate_urls(&self, html: &str, page_url: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for element in document.select(&self.detail_link) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if let Some(url) = self.resolve_in_scope(href, page_url) {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }

        tracing::debug!("Extracted {} candidate URLs from {}", urls.len(), page_url);
        urls
    }

    fn next_page_hint(&self, html: &str, page_url: &Url) -> Option<String> {
        let document = Html::parse_document(html);
        let element = document.select(&self.next_link).next()?;
        let href = element.value().attr("href")?;
        let resolved = page_url.join(href).ok()?;
        let base = self.base()?;
        if resolved.host_str() != base.host_str() {
            return None;
        }
        Some(resolved.to_string())
    }

    fn next_page_heuristic(&self, page_url: &Url) -> Option<String> {
        let param = &self.config.page_param;
        let current: u32 = page_url
            .query_pairs()
            .find(|(k, _)| k == param)
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(1);

        let mut candidate = page_url.clone();
        let others: Vec<(String, String)> = page_url
            .query_pairs()
            .filter(|(k, _)| k != param)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        candidate.query_pairs_mut().clear();
        {
            let mut pairs = candidate.query_pairs_mut();
            for (k, v) in &others {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(param, &(current + 1).to_string());
        }
        Some(candidate.to_string())
    }

    fn canonicalize_start_url(&self, raw: &str) -> Result<Url, ImportError> {
        let url = Url::parse(raw).map_err(|e| ImportError::Validation {
            hint: format!("start URL does not parse: {e}"),
        })?;
        let base = self.base().ok_or_else(|| ImportError::Validation {
            hint: "adapter base URL is invalid".to_string(),
        })?;
        if url.host_str() != base.host_str() {
            return Err(ImportError::Validation {
                hint: format!(
                    "start URL host {:?} is off-domain for this supplier",
                    url.host_str()
                ),
            });
        }
        if !url.path().starts_with(&self.config.allowed_path_prefix) {
            return Err(ImportError::Validation {
                hint: format!(
                    "start URL path {} is outside the allowed prefix {}",
                    url.path(),
                    self.config.allowed_path_prefix
                ),
            });
        }
        let mut canonical = url;
        canonical.set_fragment(None);
        Ok(canonical)
    }

    fn external_id_for(&self, url: &Url) -> Option<String> {
        url.path_segments()?
            .filter(|segment| !segment.is_empty())
            .next_back()
            .map(|s| s.to_string())
    }

    fn extract_product(
        &self,
        html: &str,
        page_url: &Url,
        supplier_id: &str,
    ) -> Option<RawProduct> {
        let document = Html::parse_document(html);

        let title = Self::text_of(&document, &self.title)?;
        let external_id = self.external_id_for(page_url)?;

        let description = Self::text_of(&document, &self.description).unwrap_or_default();
        let sku = Self::text_of(&document, &self.sku);

        let mut spec_pairs = Vec::new();
        for row in document.select(&self.spec_row) {
            let label = row
                .select(&self.spec_label)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string());
            let value = row
                .select(&self.spec_value)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string());
            if let (Some(label), Some(value)) = (label, value) {
                if !label.is_empty() && !value.is_empty() {
                    spec_pairs.push((label, value));
                }
            }
        }

        let mut images = Vec::new();
        let mut seen = HashSet::new();
        for img in document.select(&self.image) {
            let Some(src) = img.value().attr("src") else {
                continue;
            };
            if let Ok(resolved) = page_url.join(src) {
                let url = resolved.to_string();
                if seen.insert(url.clone()) {
                    images.push(url);
                }
            }
        }

        Some(RawProduct {
            supplier_id: supplier_id.to_string(),
            external_id,
            url: page_url.to_string(),
            title,
            description,
            spec_pairs,
            sku,
            images,
            price_msrp: Self::price_of(&document, &self.price_msrp),
            price_wholesale: Self::price_of(&document, &self.price_wholesale),
            availability: Self::text_of(&document, &self.availability),
        })
    }
}
