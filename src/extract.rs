//! Per-target extraction: one rendered asset page in, one flat record out.
//!
//! Navigation and parsing are split: `TargetExtractor::extract` drives the
//! page (navigate, wait for the content-ready marker, read HTML, always
//! close the tab) and `parse_record` is a pure function over the HTML, so
//! the extraction rules are testable without a browser.
//!
//! Nothing here escalates. Timeouts, navigation failures and missing
//! markers are logged and become an omission (`None`); a sparse page still
//! yields a record with whatever it exposed.

use crate::config::{Target, WatchConfig};
use crate::session::{Session, SessionState};
use chrono::{DateTime, SecondsFormat, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Label prefix identifying serial-number rows. The page repeats it; the
/// first occurrence labels a different field, so the second match wins.
const SERIAL_LABEL: &str = "Serial number";

/// One timestamped observation from a single target visit.
///
/// Wire shape: `{timestamp, assetName?, cartridgeLocation?, serialNumber?,
/// ...metricTitle: value}`. Metric values stay opaque strings; unit and
/// type interpretation belongs to downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRecord {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cartridge_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, String>,
}

/// CSS selectors for the parts of an asset page the extractor reads.
#[derive(Debug, Clone)]
pub struct PageSelectors {
    /// Presence signals the dashboard finished rendering the asset view.
    pub content_ready: String,
    pub title: String,
    pub location: String,
    /// Label-bearing rows scanned for the serial-number prefix.
    pub info_label: String,
    /// Repeated metric cards, each with a title and a value sub-element.
    pub card: String,
    pub card_title: String,
    pub card_value: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            content_ready: ".asset-dashboard".to_string(),
            title: ".asset-header .asset-title".to_string(),
            location: ".asset-header .cartridge-location".to_string(),
            info_label: ".info-row .info-label".to_string(),
            card: ".metric-card".to_string(),
            card_title: ".metric-card-title".to_string(),
            card_value: ".metric-card-value".to_string(),
        }
    }
}

/// Visits one target inside an authenticated session.
pub struct TargetExtractor {
    nav_timeout_ms: u64,
    content_timeout_ms: u64,
    selectors: PageSelectors,
}

impl TargetExtractor {
    pub fn new(cfg: &WatchConfig) -> Self {
        Self {
            nav_timeout_ms: cfg.nav_timeout_ms,
            content_timeout_ms: cfg.content_timeout_ms,
            selectors: PageSelectors::default(),
        }
    }

    pub fn with_selectors(
        nav_timeout_ms: u64,
        content_timeout_ms: u64,
        selectors: PageSelectors,
    ) -> Self {
        Self {
            nav_timeout_ms,
            content_timeout_ms,
            selectors,
        }
    }

    /// Visit `target` in a page scoped to `session` and extract a record.
    ///
    /// Returns `None` (an omission, never an error) when the page fails to
    /// render in time. The page is closed before returning on every path.
    pub async fn extract(&self, session: &Session, target: &Target) -> Option<ExtractionRecord> {
        if session.state() != SessionState::Authenticated {
            warn!(
                "target {} skipped: session is {:?}, not Authenticated",
                target.id,
                session.state()
            );
            return None;
        }

        let mut page = match session.open_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("target {} skipped: could not open page: {e}", target.id);
                return None;
            }
        };

        let record = self.visit(page.as_mut(), target).await;

        if let Err(e) = page.close().await {
            warn!("failed to close page for target {}: {e}", target.id);
        }
        record
    }

    async fn visit(
        &self,
        page: &mut dyn crate::renderer::RenderContext,
        target: &Target,
    ) -> Option<ExtractionRecord> {
        if let Err(e) = page.navigate(&target.url, self.nav_timeout_ms).await {
            warn!("target {} omitted: {e}", target.id);
            return None;
        }
        if let Err(e) = page
            .wait_for(&self.selectors.content_ready, self.content_timeout_ms)
            .await
        {
            warn!("target {} omitted: {e}", target.id);
            return None;
        }
        let html = match page.get_html().await {
            Ok(html) => html,
            Err(e) => {
                warn!("target {} omitted: could not read page: {e}", target.id);
                return None;
            }
        };

        let record = parse_record(&html, &self.selectors, Utc::now());
        debug!(
            "target {} extracted: name={:?} metrics={}",
            target.id,
            record.asset_name,
            record.metrics.len()
        );
        Some(record)
    }
}

/// Parse one rendered asset page into a record.
///
/// All fields except the timestamp are optional and reflect whatever the
/// page exposed; cards missing a title or a value are skipped.
pub fn parse_record(
    html: &str,
    selectors: &PageSelectors,
    timestamp: DateTime<Utc>,
) -> ExtractionRecord {
    let doc = Html::parse_document(html);

    let title_sel = Selector::parse(&selectors.title).unwrap();
    let location_sel = Selector::parse(&selectors.location).unwrap();
    let label_sel = Selector::parse(&selectors.info_label).unwrap();
    let card_sel = Selector::parse(&selectors.card).unwrap();
    let card_title_sel = Selector::parse(&selectors.card_title).unwrap();
    let card_value_sel = Selector::parse(&selectors.card_value).unwrap();

    let asset_name = doc
        .select(&title_sel)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty());

    let cartridge_location = doc
        .select(&location_sel)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty());

    // The serial label appears twice; the first row is a different field.
    let serial_number = doc
        .select(&label_sel)
        .map(element_text)
        .filter(|t| t.starts_with(SERIAL_LABEL))
        .nth(1)
        .map(|t| {
            t[SERIAL_LABEL.len()..]
                .trim_start_matches(':')
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty());

    let mut metrics = BTreeMap::new();
    for card in doc.select(&card_sel) {
        let title = card.select(&card_title_sel).next().map(element_text);
        let value = card.select(&card_value_sel).next().map(element_text);
        if let (Some(title), Some(value)) = (title, value) {
            if !title.is_empty() {
                metrics.insert(title, value);
            }
        }
    }

    ExtractionRecord {
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        asset_name,
        cartridge_location,
        serial_number,
        metrics,
    }
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use crate::testing::{login_config, login_pages, PageFixture, ScriptedEngine};
    use std::sync::Arc;

    fn selectors() -> PageSelectors {
        PageSelectors::default()
    }

    fn full_page() -> &'static str {
        r#"<html><body>
            <div class="asset-dashboard">
              <div class="asset-header">
                <h1 class="asset-title">Freezer 7</h1>
                <span class="cartridge-location">Cold room B</span>
              </div>
              <div class="info-row"><span class="info-label">Serial number: GW-0042</span></div>
              <div class="info-row"><span class="info-label">Serial number: SN-1138</span></div>
              <div class="info-row"><span class="info-label">Firmware: 2.4.1</span></div>
              <div class="metric-card">
                <div class="metric-card-title">Temperature</div>
                <div class="metric-card-value">-18.4 °C</div>
              </div>
              <div class="metric-card">
                <div class="metric-card-title">Door openings</div>
                <div class="metric-card-value">12</div>
              </div>
              <div class="metric-card">
                <div class="metric-card-title">Orphan card</div>
              </div>
            </div>
        </body></html>"#
    }

    #[test]
    fn test_parse_full_page() {
        let record = parse_record(full_page(), &selectors(), Utc::now());
        assert_eq!(record.asset_name.as_deref(), Some("Freezer 7"));
        assert_eq!(record.cartridge_location.as_deref(), Some("Cold room B"));
        // Second label match wins; the first is the gateway serial.
        assert_eq!(record.serial_number.as_deref(), Some("SN-1138"));
        assert_eq!(record.metrics.len(), 2);
        assert_eq!(
            record.metrics.get("Temperature").map(String::as_str),
            Some("-18.4 °C")
        );
        assert_eq!(
            record.metrics.get("Door openings").map(String::as_str),
            Some("12")
        );
        // Card without a value sub-element is skipped.
        assert!(!record.metrics.contains_key("Orphan card"));
    }

    #[test]
    fn test_parse_sparse_page_yields_metrics_only() {
        let html = r#"<html><body><div class="asset-dashboard">
            <div class="metric-card">
              <div class="metric-card-title">Humidity</div>
              <div class="metric-card-value">41%</div>
            </div>
        </div></body></html>"#;

        let record = parse_record(html, &selectors(), Utc::now());
        assert!(record.asset_name.is_none());
        assert!(record.cartridge_location.is_none());
        assert!(record.serial_number.is_none());
        assert_eq!(record.metrics.len(), 1);

        // Wire shape: exactly the timestamp plus the one metric key.
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("timestamp"));
        assert_eq!(obj.get("Humidity").and_then(|v| v.as_str()), Some("41%"));
    }

    #[test]
    fn test_single_serial_label_is_omitted() {
        let html = r#"<html><body><div class="asset-dashboard">
            <div class="info-row"><span class="info-label">Serial number: GW-0042</span></div>
        </div></body></html>"#;

        let record = parse_record(html, &selectors(), Utc::now());
        assert!(record.serial_number.is_none());
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let record = parse_record("<html></html>", &selectors(), Utc::now());
        assert!(DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    }

    #[test]
    fn test_record_roundtrips_camel_case() {
        let record = parse_record(full_page(), &selectors(), Utc::now());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("assetName").is_some());
        assert!(value.get("cartridgeLocation").is_some());
        assert!(value.get("serialNumber").is_some());
    }

    async fn authed_session(
        extra: Vec<(String, PageFixture)>,
    ) -> (Arc<ScriptedEngine>, SessionManager, crate::session::Session) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = login_config(dir.path().to_path_buf());
        let mut pages = login_pages(&cfg.selectors);
        pages.extend(extra);
        let engine = Arc::new(ScriptedEngine::new(pages));
        let manager = SessionManager::new(Arc::clone(&engine) as _, cfg);
        let session = manager.acquire().await.unwrap();
        (engine, manager, session)
    }

    #[tokio::test]
    async fn test_extract_closes_page_on_success_and_failure() {
        let sel = selectors();
        let ready = PageFixture::new(full_page()).with_selector(&sel.content_ready);
        let (engine, manager, mut session) = authed_session(vec![
            ("https://dash.example/asset/ok".to_string(), ready),
            (
                "https://dash.example/asset/stuck".to_string(),
                PageFixture::new("<html>spinner</html>"),
            ),
        ])
        .await;

        let extractor = TargetExtractor::with_selectors(100, 100, sel);
        let ok_target = Target {
            id: "ok".to_string(),
            url: "https://dash.example/asset/ok".to_string(),
        };
        let stuck_target = Target {
            id: "stuck".to_string(),
            url: "https://dash.example/asset/stuck".to_string(),
        };

        assert!(extractor.extract(&session, &ok_target).await.is_some());
        // Only the login page remains open.
        assert_eq!(session.active_pages(), 1);

        // Content-ready marker never appears: omission, still no leak.
        assert!(extractor.extract(&session, &stuck_target).await.is_none());
        assert_eq!(session.active_pages(), 1);

        manager.release(&mut session).await;
        assert_eq!(engine.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_extract_navigation_failure_is_omission() {
        let sel = selectors();
        let (_engine, manager, mut session) = authed_session(vec![(
            "https://dash.example/asset/broken".to_string(),
            PageFixture::failing_nav(),
        )])
        .await;

        let extractor = TargetExtractor::with_selectors(100, 100, sel);
        let target = Target {
            id: "broken".to_string(),
            url: "https://dash.example/asset/broken".to_string(),
        };
        assert!(extractor.extract(&session, &target).await.is_none());
        manager.release(&mut session).await;
    }

    #[tokio::test]
    async fn test_extract_requires_authenticated_session() {
        let sel = selectors();
        let (_engine, manager, mut session) = authed_session(Vec::new()).await;
        manager.release(&mut session).await;

        let extractor = TargetExtractor::with_selectors(100, 100, sel);
        let target = Target {
            id: "x".to_string(),
            url: "https://dash.example/asset/x".to_string(),
        };
        assert!(extractor.extract(&session, &target).await.is_none());
    }
}
