// Copyright 2026 Assetwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface for the watch service.
//!
//! Three endpoints beside the banner: `/health` for liveness probes,
//! `/data` to download the client's NDJSON history, and `/scrape` to drive
//! one cycle synchronously. `/scrape` goes through the scheduler's cycle
//! mutex, so a triggered cycle can never interleave with a scheduled one;
//! it simply waits its turn.

use crate::scheduler::LoopScheduler;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct AppState {
    pub scheduler: Arc<LoopScheduler>,
    pub store_path: PathBuf,
}

/// Build the axum Router with all endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/data", get(data))
        .route("/scrape", get(scrape))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP surface listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> &'static str {
    "assetwatch"
}

async fn health() -> &'static str {
    "ok"
}

/// Download the history store as NDJSON.
///
/// A concurrent append may leave an incomplete trailing line; that is the
/// store's documented read contract, passed straight through to clients.
async fn data(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read(&state.store_path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            bytes,
        )
            .into_response(),
        Err(_) => Json(json!({
            "message": "No data available yet. Trigger /scrape first."
        }))
        .into_response(),
    }
}

/// Run one cycle synchronously and report that invocation's outcome.
async fn scrape(State(state): State<Arc<AppState>>) -> Response {
    info!("cycle triggered via /scrape");
    match state.scheduler.run_cycle_once().await {
        Ok(report) => Json(json!({
            "success": true,
            "cycle": report.cycle,
            "attempted": report.attempted,
            "succeeded": report.succeeded,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, Target, WatchConfig};
    use crate::extract::PageSelectors;
    use crate::renderer::EngineFactory;
    use crate::scheduler::{Clock, SystemClock};
    use crate::testing::{login_pages, PageFixture, ScriptedEngine, LOGIN_URL};
    use std::future::IntoFuture;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> WatchConfig {
        WatchConfig {
            credentials: Credentials {
                email: "ops@example.com".to_string(),
                password: "hunter2".to_string(),
            },
            targets: vec![Target {
                id: "a".to_string(),
                url: "https://dash.example/asset/a".to_string(),
            }],
            client: "client1".to_string(),
            data_dir: dir.join("data"),
            batch_size: 2,
            target_pause: Duration::ZERO,
            batch_pause: Duration::ZERO,
            poll_interval: Duration::from_secs(60),
            memory_threshold_mb: 8_192,
            login_url: LOGIN_URL.to_string(),
            control_timeout_ms: 100,
            dashboard_timeout_ms: 100,
            nav_timeout_ms: 100,
            content_timeout_ms: 100,
            http_port: 0,
        }
    }

    async fn spawn_app(cfg: &WatchConfig) -> String {
        let sel = PageSelectors::default();
        let mut pages = login_pages(&crate::session::LoginSelectors::default());
        pages.insert(
            "https://dash.example/asset/a".to_string(),
            PageFixture::new(
                r#"<div class="asset-dashboard">
                     <div class="asset-header"><h1 class="asset-title">Asset A</h1></div>
                     <div class="metric-card">
                       <div class="metric-card-title">Temperature</div>
                       <div class="metric-card-value">-18.0 °C</div>
                     </div>
                   </div>"#,
            )
            .with_selector(&sel.content_ready),
        );
        let engine = Arc::new(ScriptedEngine::new(pages));
        let scheduler = Arc::new(LoopScheduler::new(
            cfg,
            engine as Arc<dyn EngineFactory>,
            Arc::new(SystemClock) as Arc<dyn Clock>,
        ));
        let state = Arc::new(AppState {
            scheduler,
            store_path: cfg.store_path(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router(state)).into_future());
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_health_data_and_trigger_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let base = spawn_app(&cfg).await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        // No data before the first cycle.
        let empty: serde_json::Value = client
            .get(format!("{base}/data"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(empty.get("message").is_some());

        // Trigger one cycle.
        let trigger: serde_json::Value = client
            .get(format!("{base}/scrape"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(trigger.get("success"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(trigger.get("attempted").and_then(|v| v.as_u64()), Some(1));

        // Store is now downloadable as NDJSON.
        let data = client.get(format!("{base}/data")).send().await.unwrap();
        assert_eq!(
            data.headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/x-ndjson")
        );
        let body = data.text().await.unwrap();
        let lines: Vec<_> = body.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(
            record.get("assetName").and_then(|v| v.as_str()),
            Some("Asset A")
        );
    }

    #[tokio::test]
    async fn test_failed_trigger_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        // Login entry never renders: every triggered cycle fails.
        cfg.login_url = "https://dash.example/asset/a".to_string();
        let base = spawn_app(&cfg).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/scrape")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body.get("success"), Some(&serde_json::Value::Bool(false)));
        assert!(body.get("error").is_some());
    }
}
