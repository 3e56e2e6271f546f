//! Authenticated browser session lifecycle.
//!
//! `SessionManager::acquire` drives the dashboard's sequential identity
//! flow as an explicit state machine with one typed failure per step, and
//! `release` guarantees the engine and every page derived from it are
//! closed on every exit path. A cycle never sees a half-authenticated
//! session: `acquire` returns either an `Authenticated` session or an
//! `AuthError`, with the engine already shut down in the error case.

use crate::config::{Credentials, WatchConfig};
use crate::renderer::{EngineFactory, RenderContext, Renderer};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Observable steps of the identity flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    EntryPage,
    EmailStep,
    PasswordStep,
    DashboardReady,
}

impl LoginStep {
    pub fn slug(self) -> &'static str {
        match self {
            LoginStep::EntryPage => "entry-page",
            LoginStep::EmailStep => "email-step",
            LoginStep::PasswordStep => "password-step",
            LoginStep::DashboardReady => "dashboard-ready",
        }
    }
}

/// Login failed. One variant per identity-flow step, plus engine faults
/// that occur before the flow starts.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login page did not render: {reason}")]
    EntryPage { reason: String },

    #[error("email sign-in step failed: {reason}")]
    EmailStep { reason: String },

    #[error("password step failed: {reason}")]
    PasswordStep { reason: String },

    #[error("dashboard did not become ready: {reason}")]
    DashboardReady { reason: String },

    #[error("browser engine failed during login: {0}")]
    Engine(String),
}

impl AuthError {
    /// The step the failure belongs to, when it belongs to one.
    pub fn step(&self) -> Option<LoginStep> {
        match self {
            AuthError::EntryPage { .. } => Some(LoginStep::EntryPage),
            AuthError::EmailStep { .. } => Some(LoginStep::EmailStep),
            AuthError::PasswordStep { .. } => Some(LoginStep::PasswordStep),
            AuthError::DashboardReady { .. } => Some(LoginStep::DashboardReady),
            AuthError::Engine(_) => None,
        }
    }

    fn slug(&self) -> &'static str {
        self.step().map(LoginStep::slug).unwrap_or("engine")
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
    Closed,
}

/// One authenticated browser session. Exclusively owns the engine handle;
/// every page it spawns lives strictly inside its lifetime.
pub struct Session {
    engine: Box<dyn Renderer>,
    login_page: Option<Box<dyn RenderContext>>,
    state: SessionState,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Open a fresh page in this session, reusing its authentication state.
    ///
    /// Callers must close the page themselves; `release` only guarantees
    /// engine-level teardown.
    pub async fn open_page(&self) -> anyhow::Result<Box<dyn RenderContext>> {
        if self.state != SessionState::Authenticated {
            anyhow::bail!("session is {:?}, not Authenticated", self.state);
        }
        self.engine.new_context().await
    }

    /// Pages currently open in this session's engine.
    pub fn active_pages(&self) -> usize {
        self.engine.active_contexts()
    }
}

/// CSS selectors the identity flow depends on. The dashboard uses a
/// FirebaseUI-style login; the defaults match that widget's classes.
#[derive(Debug, Clone)]
pub struct LoginSelectors {
    /// Confirms the login entry point rendered.
    pub entry_marker: String,
    /// Chooses email-based sign-in.
    pub email_method: String,
    pub email_input: String,
    pub email_submit: String,
    pub password_input: String,
    pub password_submit: String,
    /// Present only on the dashboard; confirms login succeeded.
    pub dashboard_marker: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            entry_marker: ".firebaseui-idp-list".to_string(),
            email_method: "button.firebaseui-idp-password".to_string(),
            email_input: "input.firebaseui-id-email".to_string(),
            email_submit: "button.firebaseui-id-submit".to_string(),
            password_input: "input.firebaseui-id-password".to_string(),
            password_submit: "button.firebaseui-id-submit".to_string(),
            dashboard_marker: ".dashboard-container".to_string(),
        }
    }
}

/// Everything `SessionManager` needs to drive a login.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub login_url: String,
    pub credentials: Credentials,
    /// Timeout for each UI control becoming available.
    pub control_timeout_ms: u64,
    /// Timeout for full dashboard readiness.
    pub dashboard_timeout_ms: u64,
    pub nav_timeout_ms: u64,
    pub snapshot_dir: PathBuf,
    pub selectors: LoginSelectors,
}

impl LoginConfig {
    pub fn from_watch(cfg: &WatchConfig) -> Self {
        Self {
            login_url: cfg.login_url.clone(),
            credentials: cfg.credentials.clone(),
            control_timeout_ms: cfg.control_timeout_ms,
            dashboard_timeout_ms: cfg.dashboard_timeout_ms,
            nav_timeout_ms: cfg.nav_timeout_ms,
            snapshot_dir: cfg.snapshot_dir(),
            selectors: LoginSelectors::default(),
        }
    }
}

/// Owns session acquisition and guaranteed release.
pub struct SessionManager {
    factory: Arc<dyn EngineFactory>,
    cfg: LoginConfig,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn EngineFactory>, cfg: LoginConfig) -> Self {
        Self { factory, cfg }
    }

    /// Launch an engine and authenticate.
    ///
    /// On any step failure a diagnostic snapshot of the page is written for
    /// postmortem, the engine is shut down, and the step's typed error is
    /// returned. Snapshot capture never changes the failure classification.
    pub async fn acquire(&self) -> Result<Session, AuthError> {
        let engine = self
            .factory
            .launch()
            .await
            .map_err(|e| AuthError::Engine(e.to_string()))?;

        let mut page = match engine.new_context().await {
            Ok(page) => page,
            Err(e) => {
                let _ = engine.shutdown().await;
                return Err(AuthError::Engine(e.to_string()));
            }
        };

        debug!("session authenticating against {}", self.cfg.login_url);
        match self.run_login_flow(&mut page).await {
            Ok(()) => {
                info!("session authenticated");
                Ok(Session {
                    engine,
                    login_page: Some(page),
                    state: SessionState::Authenticated,
                    created_at: Utc::now(),
                })
            }
            Err(err) => {
                self.capture_snapshot(&*page, &err).await;
                let _ = page.close().await;
                let _ = engine.shutdown().await;
                Err(err)
            }
        }
    }

    /// The four-step identity flow. Each step maps its failure to its own
    /// `AuthError` variant so callers can tell which step timed out.
    async fn run_login_flow(&self, page: &mut Box<dyn RenderContext>) -> Result<(), AuthError> {
        let sel = &self.cfg.selectors;
        let control = self.cfg.control_timeout_ms;

        // Step 1: login entry point rendered.
        page.navigate(&self.cfg.login_url, self.cfg.nav_timeout_ms)
            .await
            .map_err(|e| AuthError::EntryPage {
                reason: e.to_string(),
            })?;
        page.wait_for(&sel.entry_marker, control)
            .await
            .map_err(|e| AuthError::EntryPage {
                reason: e.to_string(),
            })?;
        debug!("login step 1/4: entry page rendered");

        // Step 2: choose email sign-in and submit the address.
        let email_step = async {
            page.click(&sel.email_method).await?;
            page.wait_for(&sel.email_input, control).await?;
            page.fill(&sel.email_input, &self.cfg.credentials.email)
                .await?;
            page.click(&sel.email_submit).await
        };
        email_step.await.map_err(|e| AuthError::EmailStep {
            reason: e.to_string(),
        })?;
        debug!("login step 2/4: email submitted");

        // Step 3: password, once its field becomes available.
        let password_step = async {
            page.wait_for(&sel.password_input, control).await?;
            page.fill(&sel.password_input, &self.cfg.credentials.password)
                .await?;
            page.click(&sel.password_submit).await
        };
        password_step.await.map_err(|e| AuthError::PasswordStep {
            reason: e.to_string(),
        })?;
        debug!("login step 3/4: password submitted");

        // Step 4: dashboard-only marker confirms success.
        page.wait_for(&sel.dashboard_marker, self.cfg.dashboard_timeout_ms)
            .await
            .map_err(|e| AuthError::DashboardReady {
                reason: e.to_string(),
            })?;
        debug!("login step 4/4: dashboard ready");

        Ok(())
    }

    /// Write the failing page's HTML for postmortem. Best effort only.
    async fn capture_snapshot(&self, page: &dyn RenderContext, err: &AuthError) {
        let html = page.get_html().await.unwrap_or_default();
        let url = page.get_url().await.unwrap_or_default();

        let name = format!(
            "login-{}-{}.html",
            err.slug(),
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        );
        let path = self.cfg.snapshot_dir.join(name);

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.cfg.snapshot_dir)?;
            std::fs::write(&path, format!("<!-- captured from {url} -->\n{html}"))
        };
        match write() {
            Ok(()) => warn!("login failed ({err}); snapshot saved to {}", path.display()),
            Err(io) => warn!("login failed ({err}); snapshot could not be written: {io}"),
        }
    }

    /// Close every page and shut the engine down. Idempotent; errors are
    /// logged, never propagated, so release works on every exit path.
    pub async fn release(&self, session: &mut Session) {
        if session.state == SessionState::Closed {
            return;
        }
        if let Some(page) = session.login_page.take() {
            if let Err(e) = page.close().await {
                warn!("failed to close login page: {e}");
            }
        }
        if let Err(e) = session.engine.shutdown().await {
            warn!("failed to shut down engine: {e}");
        }
        session.state = SessionState::Closed;
        debug!("session released");
    }
}
