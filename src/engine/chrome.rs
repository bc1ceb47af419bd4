//! Headless Chrome/Chromium engine.
//!
//! One [`ChromeEngine`] wraps one browser process. Every render session is
//! a fresh tab ([`ChromeSession`]) in that process.
//!
//! # Overview
//!
//! - Launch options are tuned for headless, containerised operation
//!   (see [`create_chrome_options`])
//! - Documents are loaded as percent-encoded `data:text/html` URLs
//! - Readiness waits for the load event, images and web fonts, or an
//!   explicit `window.isPageDone` flag set by the page
//! - Output is A4 with backgrounds, zero margins
//!
//! # Example
//!
//! ```rust,ignore
//! use html2pdf_gate::ChromeLauncher;
//!
//! // Auto-detect Chrome installation
//! let launcher = ChromeLauncher::with_defaults();
//!
//! // Or specify custom path
//! let launcher = ChromeLauncher::with_path("/usr/bin/chromium".to_string());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};

use super::{CrashNotifier, Engine, EngineLauncher, EngineSession};
use crate::error::{EngineError, EngineStage};
use crate::traits::Healthcheck;

/// Default per-call CDP timeout applied to every tab.
///
/// Deadlines are enforced by the caller; this only bounds how long an
/// abandoned blocking call can linger.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A4 paper size in inches.
const A4_WIDTH_INCHES: f64 = 8.27;
const A4_HEIGHT_INCHES: f64 = 11.69;

/// Readiness probe evaluated in the page.
///
/// A page that sets `window.isPageDone` decides for itself. Otherwise the
/// document counts as ready once loading finished, every image is decoded
/// and web fonts are loaded.
const READY_PROBE_SCRIPT: &str = r#"(() => {
    if (window.isPageDone === true) return true;
    if (window.isPageDone === false) return false;
    if (document.readyState !== 'complete') return false;
    const imagesDone = Array.from(document.images).every((img) => img.complete);
    const fontsDone = !document.fonts || document.fonts.status === 'loaded';
    return imagesDone && fontsDone;
})()"#;

// ============================================================================
// ChromeLauncher
// ============================================================================

/// Launches headless Chrome processes.
///
/// # Thread Safety
///
/// This launcher is `Send + Sync` and can be shared with the supervisor's
/// restart task.
pub struct ChromeLauncher {
    /// Function that generates launch options for each process.
    launch_options_fn: Box<dyn Fn() -> Result<LaunchOptions<'static>, EngineError> + Send + Sync>,

    /// Default CDP timeout set on every tab.
    operation_timeout: Duration,
}

impl ChromeLauncher {
    /// Create a launcher with a custom launch options function.
    ///
    /// ```rust,ignore
    /// use html2pdf_gate::{ChromeLauncher, create_chrome_options};
    ///
    /// let launcher = ChromeLauncher::new(|| create_chrome_options(Some("/opt/chrome/chrome")));
    /// ```
    pub fn new<F>(launch_options_fn: F) -> Self
    where
        F: Fn() -> Result<LaunchOptions<'static>, EngineError> + Send + Sync + 'static,
    {
        Self {
            launch_options_fn: Box::new(launch_options_fn),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Create a launcher with auto-detected Chrome path.
    ///
    /// # Platform Detection
    ///
    /// | Platform | Paths Searched |
    /// |----------|----------------|
    /// | Linux | `/usr/bin/google-chrome`, `/usr/bin/chromium`, etc. |
    /// | macOS | `/Applications/Google Chrome.app/...` |
    /// | Windows | `C:\Program Files\Google\Chrome\...` |
    pub fn with_defaults() -> Self {
        log::debug!("🔧 Creating ChromeLauncher with auto-detect");
        Self::new(|| create_chrome_options(None))
    }

    /// Create a launcher with a custom Chrome binary path.
    pub fn with_path(chrome_path: String) -> Self {
        log::debug!("🔧 Creating ChromeLauncher with custom path: {}", chrome_path);
        Self::new(move || create_chrome_options(Some(&chrome_path)))
    }

    /// Override the per-call CDP timeout applied to every tab.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

impl EngineLauncher for ChromeLauncher {
    fn launch(&self, notifier: CrashNotifier) -> Result<Arc<dyn Engine>, EngineError> {
        log::trace!("🔧 ChromeLauncher::launch() called");

        let options = (self.launch_options_fn)()?;

        log::debug!("🚀 Launching Chrome (generation {})...", notifier.generation());
        let browser = Browser::new(options).map_err(|e| {
            log::error!("❌ Chrome launch failed: {}", e);
            EngineError::Launch(e.to_string())
        })?;

        Ok(Arc::new(ChromeEngine {
            browser: Mutex::new(Some(Arc::new(browser))),
            notifier,
            operation_timeout: self.operation_timeout,
            next_session_id: AtomicU64::new(1),
        }))
    }
}

impl std::fmt::Debug for ChromeLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeLauncher")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

/// Create Chrome launch options with optional custom path.
///
/// # Chrome Flags Applied
///
/// ## Memory and Performance
/// - `--disable-dev-shm-usage` - Use /tmp instead of /dev/shm (container-friendly)
/// - `--disable-crash-reporter` - No crash reporting
/// - `--max_old_space_size=1024` - Limit V8 heap to 1GB
///
/// ## GPU and Rendering
/// - `--disable-gpu-compositing`, `--disable-software-rasterizer`,
///   `--disable-accelerated-2d-canvas`, `--disable-gl-drawing-for-tests`,
///   `--disable-webgl`, `--disable-webgl2`
///
/// ## Disabled Features
/// - `--disable-extensions`, `--disable-plugins`, `--disable-sync`,
///   `--disable-default-apps`
///
/// ## Automation
/// - `--enable-automation` - Mark the browser as remotely controlled
///
/// ## Stability
/// - `--disable-background-timer-throttling`
/// - `--disable-backgrounding-occluded-windows`
/// - `--disable-hang-monitor`
/// - `--disable-popup-blocking`
/// - `--disable-renderer-backgrounding`
/// - `--disable-ipc-flooding-protection`
///
/// # Errors
///
/// Returns [`EngineError::Launch`] if the options builder rejects the
/// configuration.
pub fn create_chrome_options(chrome_path: Option<&str>) -> Result<LaunchOptions<'static>, EngineError> {
    match chrome_path {
        Some(path) => log::debug!("🔧 Creating Chrome options with custom path: {}", path),
        None => log::debug!("🔧 Creating Chrome options (auto-detect browser)"),
    }

    let mut builder = LaunchOptions::default_builder();

    if let Some(path) = chrome_path {
        builder.path(Some(path.to_string().into()));
    }

    builder
        .headless(true)
        .sandbox(false) // required in most containers
        .disable_default_args(true)
        .args(vec![
            // ===== Memory and Performance =====
            "--disable-dev-shm-usage".as_ref(),
            "--disable-crash-reporter".as_ref(),
            "--max_old_space_size=1024".as_ref(),
            // ===== GPU and Rendering =====
            "--disable-gpu-compositing".as_ref(),
            "--disable-software-rasterizer".as_ref(),
            "--disable-accelerated-2d-canvas".as_ref(),
            "--disable-gl-drawing-for-tests".as_ref(),
            "--disable-webgl".as_ref(),
            "--disable-webgl2".as_ref(),
            // ===== Disable Unnecessary Features =====
            "--disable-extensions".as_ref(),
            "--disable-plugins".as_ref(),
            "--disable-sync".as_ref(),
            "--disable-default-apps".as_ref(),
            // ===== Automation =====
            "--enable-automation".as_ref(),
            // ===== Stability =====
            "--disable-background-timer-throttling".as_ref(),
            "--disable-backgrounding-occluded-windows".as_ref(),
            "--disable-hang-monitor".as_ref(),
            "--disable-popup-blocking".as_ref(),
            "--disable-renderer-backgrounding".as_ref(),
            "--disable-ipc-flooding-protection".as_ref(),
        ])
        .build()
        .map_err(|e| {
            let path_msg = chrome_path.unwrap_or("auto-detect");
            log::error!("❌ Failed to build Chrome launch options (path: {}): {}", path_msg, e);
            EngineError::Launch(e.to_string())
        })
}

// ============================================================================
// ChromeEngine
// ============================================================================

/// A running headless Chrome process.
pub struct ChromeEngine {
    /// `None` once closed. Cloned out before any I/O so the lock is never
    /// held across a CDP call.
    browser: Mutex<Option<Arc<Browser>>>,

    notifier: CrashNotifier,

    operation_timeout: Duration,

    next_session_id: AtomicU64,
}

impl ChromeEngine {
    fn browser(&self, stage: EngineStage) -> Result<Arc<Browser>, EngineError> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| EngineError::disconnected(stage, "browser already closed"))
    }
}

impl Healthcheck for ChromeEngine {
    /// Open and immediately close a tab.
    fn ping(&self) -> Result<(), EngineError> {
        let browser = self.browser(EngineStage::HealthCheck)?;

        let tab = browser.new_tab().map_err(|e| {
            log::error!(
                "❌ Chrome generation {} ping failed (new_tab): {}",
                self.notifier.generation(),
                e
            );
            classify_cdp_error(EngineStage::HealthCheck, &e.to_string(), self.operation_timeout)
        })?;

        let _ = tab.close(true);
        Ok(())
    }
}

impl Engine for ChromeEngine {
    fn open_session(&self) -> Result<Arc<dyn EngineSession>, EngineError> {
        let browser = self.browser(EngineStage::OpenSession)?;

        let tab = browser.new_tab().map_err(|e| {
            let error = classify_cdp_error(EngineStage::OpenSession, &e.to_string(), self.operation_timeout);
            log::warn!("⚠️ Failed to open Chrome tab: {}", error);
            error
        })?;
        tab.set_default_timeout(self.operation_timeout);

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        log::trace!("📄 Opened Chrome session {}", id);

        Ok(Arc::new(ChromeSession {
            id,
            tab,
            notifier: self.notifier.clone(),
            operation_timeout: self.operation_timeout,
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<(), EngineError> {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(browser) = browser {
            log::info!("🛑 Closing Chrome generation {}", self.notifier.generation());
            // Dropping the last handle kills the child process.
            drop(browser);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChromeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("ChromeEngine")
            .field("generation", &self.notifier.generation())
            .field("open", &open)
            .finish()
    }
}

// ============================================================================
// ChromeSession
// ============================================================================

/// A browser tab hosting one document.
pub struct ChromeSession {
    id: u64,
    tab: Arc<Tab>,
    notifier: CrashNotifier,
    operation_timeout: Duration,
    closed: AtomicBool,
}

impl ChromeSession {
    /// Map a CDP failure and report a lost connection to the supervisor.
    ///
    /// All tabs share one DevTools connection, so a disconnect seen here
    /// means the whole process is unreachable.
    fn fail(&self, stage: EngineStage, message: String) -> EngineError {
        let error = classify_cdp_error(stage, &message, self.operation_timeout);
        if error.is_disconnect() {
            self.notifier.notify(message);
        }
        error
    }
}

impl EngineSession for ChromeSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn load(&self, document: &str) -> Result<(), EngineError> {
        let data_url = to_data_url(document);
        log::trace!(
            "Session {} loading document ({} bytes, data URL {} bytes)",
            self.id,
            document.len(),
            data_url.len()
        );

        self.tab
            .navigate_to(&data_url)
            .map_err(|e| self.fail(EngineStage::Load, e.to_string()))?
            .wait_until_navigated()
            .map_err(|e| self.fail(EngineStage::Load, e.to_string()))?;
        Ok(())
    }

    fn is_ready(&self) -> Result<bool, EngineError> {
        let result = self
            .tab
            .evaluate(READY_PROBE_SCRIPT, false)
            .map_err(|e| self.fail(EngineStage::WaitReady, e.to_string()))?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn render(&self) -> Result<Vec<u8>, EngineError> {
        self.tab
            .print_to_pdf(build_print_options())
            .map_err(|e| self.fail(EngineStage::Render, e.to_string()))
    }

    fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::trace!("Closing Chrome session {}", self.id);
        self.tab
            .close(true)
            .map(|_| ())
            .map_err(|e| classify_cdp_error(EngineStage::Close, &e.to_string(), self.operation_timeout))
    }
}

impl std::fmt::Debug for ChromeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeSession")
            .field("id", &self.id)
            .field("generation", &self.notifier.generation())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Encode a markup document as a `data:text/html` URL.
fn to_data_url(document: &str) -> String {
    format!("data:text/html;charset=utf-8,{}", urlencoding::encode(document))
}

/// A4 portrait, backgrounds on, zero margins, no header/footer.
fn build_print_options() -> Option<PrintToPdfOptions> {
    Some(PrintToPdfOptions {
        landscape: Some(false),
        display_header_footer: Some(false),
        print_background: Some(true),
        paper_width: Some(A4_WIDTH_INCHES),
        paper_height: Some(A4_HEIGHT_INCHES),
        margin_top: Some(0.0),
        margin_bottom: Some(0.0),
        margin_left: Some(0.0),
        margin_right: Some(0.0),
        ..Default::default()
    })
}

/// Classify a `headless_chrome` error message.
///
/// | Message contains | Result |
/// |------------------|--------|
/// | connection (is) closed, disconnected, broken pipe, reset | `Disconnected` |
/// | timed out, timeout, never came | `Timeout` |
/// | target closed, session, websocket, protocol | `Protocol` |
/// | anything else during load / wait ready / render | `Content` |
/// | anything else | `Protocol` |
fn classify_cdp_error(stage: EngineStage, message: &str, timeout: Duration) -> EngineError {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["connection closed", "connection is closed", "disconnected", "broken pipe", "connection reset", "channel closed"]) {
        return EngineError::disconnected(stage, message);
    }
    if has(&["timed out", "timeout", "never came"]) {
        return EngineError::Timeout { stage, after: timeout };
    }
    if has(&["target closed", "session", "websocket", "protocol"]) {
        return EngineError::protocol(stage, message);
    }

    match stage {
        EngineStage::Load | EngineStage::WaitReady | EngineStage::Render => EngineError::content(stage, message),
        _ => EngineError::protocol(stage, message),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
