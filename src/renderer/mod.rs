//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). The trait
//! surface is exactly what the login flow and the extractor need: navigate,
//! wait for a selector, click, fill, read back HTML. Tests substitute a
//! scripted in-memory engine (see `crate::testing`).

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Launches a browser engine.
///
/// The session layer goes through this seam so each cycle can own a fresh
/// engine and tests can inject a scripted one.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Renderer>>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine and its child processes.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Wait until an element matching `selector` exists, or time out.
    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<()>;
    /// Click the first element matching `selector`. Takes `&mut self`
    /// because a click may navigate the context.
    async fn click(&mut self, selector: &str) -> Result<()>;
    /// Set the value of the first input matching `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}
