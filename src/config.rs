//! Environment-driven configuration.
//!
//! Everything the watch loop needs is read once at startup and treated as
//! immutable for the process lifetime. Observed deployments disagree on
//! batch size, per-step timeouts, and the memory threshold, so all of them
//! are configurable rather than hard-coded.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_LOGIN_URL: &str = "https://blockinar.io/login";
const DEFAULT_CLIENT: &str = "client1";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_BATCH_SIZE: usize = 2;
const DEFAULT_TARGET_PAUSE_MS: u64 = 1_500;
const DEFAULT_BATCH_PAUSE_MS: u64 = 3_000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_MEMORY_THRESHOLD_MB: u64 = 512;
const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DASHBOARD_TIMEOUT_MS: u64 = 45_000;
const DEFAULT_NAV_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONTENT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_HTTP_PORT: u16 = 10_000;

/// Dashboard login credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// One asset-detail page to visit each cycle. Immutable, supplied externally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub url: String,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub credentials: Credentials,
    pub targets: Vec<Target>,
    /// Client namespace; scopes the history file.
    pub client: String,
    pub data_dir: PathBuf,
    pub batch_size: usize,
    /// Pause between consecutive target visits.
    pub target_pause: Duration,
    /// Pause between batches.
    pub batch_pause: Duration,
    pub poll_interval: Duration,
    pub memory_threshold_mb: u64,
    pub login_url: String,
    /// Per-step timeout for login UI controls becoming available.
    pub control_timeout_ms: u64,
    /// Timeout for full dashboard readiness after login.
    pub dashboard_timeout_ms: u64,
    /// Timeout for navigating to a target page.
    pub nav_timeout_ms: u64,
    /// Timeout for a target page's content-ready marker.
    pub content_timeout_ms: u64,
    pub http_port: u16,
}

impl WatchConfig {
    /// Load configuration from the environment.
    ///
    /// Credentials and at least one target URL are required; everything else
    /// has a default.
    pub fn from_env() -> Result<Self> {
        let email = read_env_string("ASSETWATCH_EMAIL");
        let password = read_env_string("ASSETWATCH_PASSWORD");
        let (Some(email), Some(password)) = (email, password) else {
            bail!("ASSETWATCH_EMAIL and ASSETWATCH_PASSWORD are required");
        };

        let raw_targets = read_env_string("ASSETWATCH_TARGETS")
            .unwrap_or_default();
        let targets = parse_targets(&raw_targets);
        if targets.is_empty() {
            bail!("ASSETWATCH_TARGETS must list at least one asset URL");
        }

        let batch_size = read_env_usize("ASSETWATCH_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1);

        let http_port = read_env_string("ASSETWATCH_PORT")
            .or_else(|| read_env_string("PORT"))
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_HTTP_PORT);

        Ok(Self {
            credentials: Credentials { email, password },
            targets,
            client: read_env_string("ASSETWATCH_CLIENT")
                .unwrap_or_else(|| DEFAULT_CLIENT.to_string()),
            data_dir: PathBuf::from(
                read_env_string("ASSETWATCH_DATA_DIR")
                    .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            batch_size,
            target_pause: Duration::from_millis(read_env_u64(
                "ASSETWATCH_TARGET_PAUSE_MS",
                DEFAULT_TARGET_PAUSE_MS,
            )),
            batch_pause: Duration::from_millis(read_env_u64(
                "ASSETWATCH_BATCH_PAUSE_MS",
                DEFAULT_BATCH_PAUSE_MS,
            )),
            poll_interval: Duration::from_secs(read_env_u64(
                "ASSETWATCH_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )),
            memory_threshold_mb: read_env_u64(
                "ASSETWATCH_MEMORY_THRESHOLD_MB",
                DEFAULT_MEMORY_THRESHOLD_MB,
            ),
            login_url: read_env_string("ASSETWATCH_LOGIN_URL")
                .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string()),
            control_timeout_ms: read_env_u64(
                "ASSETWATCH_CONTROL_TIMEOUT_MS",
                DEFAULT_CONTROL_TIMEOUT_MS,
            ),
            dashboard_timeout_ms: read_env_u64(
                "ASSETWATCH_DASHBOARD_TIMEOUT_MS",
                DEFAULT_DASHBOARD_TIMEOUT_MS,
            ),
            nav_timeout_ms: read_env_u64("ASSETWATCH_NAV_TIMEOUT_MS", DEFAULT_NAV_TIMEOUT_MS),
            content_timeout_ms: read_env_u64(
                "ASSETWATCH_CONTENT_TIMEOUT_MS",
                DEFAULT_CONTENT_TIMEOUT_MS,
            ),
            http_port,
        })
    }

    /// Path of the append-only history file for this client.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.client).join(crate::sink::STORE_FILE)
    }

    /// Directory for login-failure page snapshots.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

/// Parse a target list from a comma/whitespace-separated URL string.
///
/// Each target's id is the `core_id` query parameter when the URL carries
/// one, otherwise its 1-based position in the list.
pub fn parse_targets(raw: &str) -> Vec<Target> {
    raw.split([',', '\n', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, url)| Target {
            id: target_id(url).unwrap_or_else(|| format!("target-{}", i + 1)),
            url: url.to_string(),
        })
        .collect()
}

fn target_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "core_id")
        .map(|(_, v)| v.into_owned())
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
