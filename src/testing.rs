//! Scripted in-memory browser engine for tests.
//!
//! Pages are fixtures: an HTML body, the set of selectors present, and
//! click transitions to other fixtures. The engine records an ordered event
//! log (launch, open, navigate, close, shutdown) that lifecycle tests
//! assert against, e.g. that cycle N+1 never launches an engine before
//! cycle N's shut down, and that no tab is ever leaked.

use crate::config::Credentials;
use crate::renderer::{EngineFactory, NavigationResult, RenderContext, Renderer};
use crate::session::{LoginConfig, LoginSelectors};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Login entry URL used by the scripted fixtures.
pub const LOGIN_URL: &str = "https://dash.example/login";

/// Fixture set for an identity flow that succeeds end to end: entry page,
/// email step, password step, dashboard.
pub fn login_pages(sel: &LoginSelectors) -> HashMap<String, PageFixture> {
    let mut pages = HashMap::new();
    pages.insert(
        LOGIN_URL.to_string(),
        PageFixture::new("<html>login</html>")
            .with_selector(&sel.entry_marker)
            .with_click(&sel.email_method, "login:email"),
    );
    pages.insert(
        "login:email".to_string(),
        PageFixture::new("<html>email</html>")
            .with_selector(&sel.email_input)
            .with_click(&sel.email_submit, "login:password"),
    );
    pages.insert(
        "login:password".to_string(),
        PageFixture::new("<html>password</html>")
            .with_selector(&sel.password_input)
            .with_click(&sel.password_submit, "dashboard"),
    );
    pages.insert(
        "dashboard".to_string(),
        PageFixture::new("<html>dashboard</html>").with_selector(&sel.dashboard_marker),
    );
    pages
}

/// A login config pointing at the scripted fixtures, with short timeouts.
pub fn login_config(snapshot_dir: PathBuf) -> LoginConfig {
    LoginConfig {
        login_url: LOGIN_URL.to_string(),
        credentials: Credentials {
            email: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
        },
        control_timeout_ms: 100,
        dashboard_timeout_ms: 100,
        nav_timeout_ms: 100,
        snapshot_dir,
        selectors: LoginSelectors::default(),
    }
}

/// One scripted page, keyed in the engine's fixture map.
#[derive(Debug, Clone, Default)]
pub struct PageFixture {
    pub html: String,
    /// Selectors `wait_for`/`click`/`fill` will find on this page.
    pub selectors: HashSet<String>,
    /// Clicking a selector switches the context to another fixture key.
    pub on_click: HashMap<String, String>,
    /// Simulate a navigation failure for this key.
    pub fail_nav: bool,
}

impl PageFixture {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.selectors.insert(selector.to_string());
        self
    }

    pub fn with_click(mut self, selector: &str, next_page: &str) -> Self {
        self.selectors.insert(selector.to_string());
        self.on_click
            .insert(selector.to_string(), next_page.to_string());
        self
    }

    pub fn failing_nav() -> Self {
        Self {
            fail_nav: true,
            ..Self::default()
        }
    }
}

/// Shared, ordered log of engine lifecycle events.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Scripted engine factory. Each `launch` shares the fixture map, event log
/// and page counter, so tests can assert across session lifetimes.
pub struct ScriptedEngine {
    pages: Arc<HashMap<String, PageFixture>>,
    log: EventLog,
    active: Arc<AtomicUsize>,
    fail_launch: bool,
}

impl ScriptedEngine {
    pub fn new(pages: HashMap<String, PageFixture>) -> Self {
        Self {
            pages: Arc::new(pages),
            log: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            fail_launch: false,
        }
    }

    pub fn failing_launch() -> Self {
        Self {
            pages: Arc::new(HashMap::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            fail_launch: true,
        }
    }

    /// Snapshot of the event log so far.
    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Pages currently open across every engine this factory launched.
    pub fn open_pages(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn record(&self, event: &str) {
        self.log.lock().unwrap().push(event.to_string());
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngine {
    async fn launch(&self) -> Result<Box<dyn Renderer>> {
        if self.fail_launch {
            bail!("scripted engine refused to launch");
        }
        self.record("launch");
        Ok(Box::new(ScriptedRenderer {
            pages: Arc::clone(&self.pages),
            log: Arc::clone(&self.log),
            active: Arc::clone(&self.active),
        }))
    }
}

pub struct ScriptedRenderer {
    pages: Arc<HashMap<String, PageFixture>>,
    log: EventLog,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.log.lock().unwrap().push("open".to_string());
        Ok(Box::new(ScriptedContext {
            pages: Arc::clone(&self.pages),
            log: Arc::clone(&self.log),
            active: Arc::clone(&self.active),
            current: None,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.log.lock().unwrap().push("shutdown".to_string());
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

pub struct ScriptedContext {
    pages: Arc<HashMap<String, PageFixture>>,
    log: EventLog,
    active: Arc<AtomicUsize>,
    current: Option<String>,
}

impl ScriptedContext {
    fn page(&self) -> Option<&PageFixture> {
        self.current.as_deref().and_then(|key| self.pages.get(key))
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        self.log.lock().unwrap().push(format!("navigate:{url}"));
        match self.pages.get(url) {
            None => bail!("navigation failed: no route to {url}"),
            Some(fixture) if fixture.fail_nav => {
                bail!("navigation timed out after {timeout_ms}ms")
            }
            Some(_) => {
                self.current = Some(url.to_string());
                Ok(NavigationResult {
                    final_url: url.to_string(),
                    load_time_ms: 0,
                })
            }
        }
    }

    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        let present = self
            .page()
            .map(|p| p.selectors.contains(selector))
            .unwrap_or(false);
        if present {
            Ok(())
        } else {
            bail!("selector '{selector}' did not appear within {timeout_ms}ms")
        }
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let (present, next) = match self.page() {
            None => (false, None),
            Some(p) => (
                p.selectors.contains(selector),
                p.on_click.get(selector).cloned(),
            ),
        };
        if let Some(next) = next {
            self.log.lock().unwrap().push(format!("click:{selector}"));
            self.current = Some(next);
            Ok(())
        } else if present {
            Ok(())
        } else {
            bail!("no element matching '{selector}' to click")
        }
    }

    async fn fill(&self, selector: &str, _value: &str) -> Result<()> {
        let present = self
            .page()
            .map(|p| p.selectors.contains(selector))
            .unwrap_or(false);
        if present {
            Ok(())
        } else {
            bail!("no element matching '{selector}' to fill")
        }
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self.page().map(|p| p.html.clone()).unwrap_or_default())
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.current.clone().unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.log.lock().unwrap().push("close".to_string());
        Ok(())
    }
}
