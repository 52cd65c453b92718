//! C3 — the browser handle.
//!
//! `BrowserEngine` is the collaborator trait a caller could substitute (for
//! testing, or to point at a different CDP-speaking engine); `ChromiumEngine`
//! is the real adapter over `chromiumoxide`, grounded on the teacher's
//! `browser_pool.rs` (instance launch + CDP handler pump) and
//! `screenshot_service.rs` (page-operation idiom). `BrowserHandle` wraps an
//! `Arc<dyn BrowserEngine>` and applies the uniform instrumentation/timeout
//! contract spec'd for every C3 operation: every call runs inside a
//! `scoped_timer` named `browser.<op>`, a predicate timeout is a negative
//! result (not an error), and any engine-level failure surfaces as
//! `RuntimeError::BrowserFailure`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::BrowserLaunchConfig;
use crate::error::RuntimeError;
use crate::interceptor::RequestInterceptor;
use crate::recorder::OperationRecorder;

/// The condition C3's `find`-style waits poll for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Present,
    Visible,
    Clickable,
}

/// The collaborator a [`BrowserHandle`] drives. Implemented by
/// [`ChromiumEngine`] for real use, and by test doubles (`mockall`) for
/// unit tests that don't want to launch a real browser.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), RuntimeError>;
    async fn find(&self, selector: &str, condition: WaitCondition) -> Result<bool, RuntimeError>;
    async fn click(&self, selector: &str) -> Result<bool, RuntimeError>;
    async fn type_text(&self, selector: &str, text: &str, clear_first: bool) -> Result<bool, RuntimeError>;
    async fn read_text(&self, selector: &str) -> Result<Option<String>, RuntimeError>;
    async fn evaluate(&self, script: &str) -> Result<Value, RuntimeError>;
    async fn screenshot(&self, path: &std::path::Path) -> Result<(), RuntimeError>;
    async fn close(&self) -> Result<(), RuntimeError>;
}

/// The real `chromiumoxide`-backed engine. One instance per live session.
///
/// `Browser` owns the spawned Chrome child process and kills it on `Drop`,
/// so it must be held for the engine's whole lifetime, not just for the
/// duration of `launch` — dropping it early tears down the process (and
/// with it the CDP connection the handler task is pumping), grounded on
/// the teacher's `browser_pool.rs` keeping `browser: Arc<Mutex<Browser>>`
/// alongside the page for the same reason.
pub struct ChromiumEngine {
    browser: tokio::sync::Mutex<Browser>,
    page: Page,
    _handler: tokio::task::JoinHandle<()>,
    interceptor: Option<RequestInterceptor>,
}

impl ChromiumEngine {
    /// Launches a fresh browser process and opens one page, grounded on
    /// `browser_pool.rs`'s `create_browser_instance` (unique temp dirs per
    /// instance, CDP handler pumped in its own task).
    pub async fn launch(config: &BrowserLaunchConfig, instance_id: usize, interceptor: Option<RequestInterceptor>) -> Result<Self, RuntimeError> {
        let unique = format!("{}-{}", std::process::id(), instance_id);
        let user_data_dir = format!("/tmp/kairos-runtime-{}", unique);
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| RuntimeError::BrowserFailure(format!("failed to create user data dir: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .window_size(config.window_width, config.window_height)
            .args(Self::chrome_args(config, &unique));

        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| RuntimeError::BrowserFailure(format!("invalid browser config: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RuntimeError::BrowserFailure(format!("launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!(error = %e, "chrome devtools handler error");
                        break;
                    }
                    None => {
                        info!("chrome devtools handler stream ended");
                        break;
                    }
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RuntimeError::BrowserFailure(format!("failed to open page: {e}")))?;

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            page,
            _handler: handler_task,
            interceptor,
        })
    }

    fn chrome_args(config: &BrowserLaunchConfig, unique: &str) -> Vec<String> {
        let mut args = vec![
            "--headless".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-background-timer-throttling".to_string(),
            "--disable-backgrounding-occluded-windows".to_string(),
            "--disable-renderer-backgrounding".to_string(),
            "--no-first-run".to_string(),
            format!("--user-data-dir=/tmp/kairos-runtime-{}", unique),
            format!("--remote-debugging-port=0"),
        ];
        if let Some(ua) = &config.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        args.extend(config.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn navigate(&self, url: &str) -> Result<(), RuntimeError> {
        if let Some(interceptor) = &self.interceptor {
            if interceptor.should_block(url) {
                debug!(url, "navigation blocked by request interceptor");
                return Ok(());
            }
        }
        self.page
            .goto(url)
            .await
            .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
        Ok(())
    }

    async fn find(&self, selector: &str, condition: WaitCondition) -> Result<bool, RuntimeError> {
        let found = self.page.find_element(selector).await.is_ok();
        match condition {
            WaitCondition::Present => Ok(found),
            WaitCondition::Visible | WaitCondition::Clickable => {
                if !found {
                    return Ok(false);
                }
                let script = format!(
                    "(() => {{ const el = document.querySelector('{}'); if (!el) return false; const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; }})()",
                    selector.replace('\'', "\\'")
                );
                match self.page.evaluate(script).await {
                    Ok(result) => Ok(result.into_value::<bool>().unwrap_or(false)),
                    Err(e) => Err(RuntimeError::BrowserFailure(e.to_string())),
                }
            }
        }
    }

    async fn click(&self, selector: &str) -> Result<bool, RuntimeError> {
        match self.page.find_element(selector).await {
            Ok(element) => {
                element
                    .click()
                    .await
                    .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn type_text(&self, selector: &str, text: &str, clear_first: bool) -> Result<bool, RuntimeError> {
        match self.page.find_element(selector).await {
            Ok(element) => {
                if clear_first {
                    let _ = element
                        .click()
                        .await
                        .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
                }
                element
                    .type_str(text)
                    .await
                    .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, RuntimeError> {
        match self.page.find_element(selector).await {
            Ok(element) => element
                .inner_text()
                .await
                .map_err(|e| RuntimeError::BrowserFailure(e.to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, RuntimeError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
        result
            .into_value::<Value>()
            .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))
    }

    async fn screenshot(&self, path: &std::path::Path) -> Result<(), RuntimeError> {
        self.page
            .save_screenshot(chromiumoxide::page::ScreenshotParams::builder().build(), path)
            .await
            .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        self.page
            .close()
            .await
            .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
        self.browser
            .lock()
            .await
            .close()
            .await
            .map_err(|e| RuntimeError::BrowserFailure(e.to_string()))?;
        Ok(())
    }
}

/// The handle callers are actually given. Wraps an engine with the uniform
/// instrumentation every C3 operation carries: a named `scoped_timer`, a
/// bounded wait, and negative-not-erroring predicate timeouts.
pub struct BrowserHandle {
    engine: Arc<dyn BrowserEngine>,
    recorder: Arc<OperationRecorder>,
    default_wait: Duration,
}

impl BrowserHandle {
    pub fn new(engine: Arc<dyn BrowserEngine>, recorder: Arc<OperationRecorder>, default_wait: Duration) -> Self {
        Self { engine, recorder, default_wait }
    }

    pub async fn navigate(&self, url: &str) -> Result<(), RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.navigate");
        let result = self.engine.navigate(url).await;
        if result.is_ok() {
            timer.success();
        }
        result
    }

    /// Waits up to `timeout` (or the handle's default) for `selector` to
    /// satisfy `condition`. A timeout is a `false`, not an error.
    pub async fn wait_for_selector(&self, selector: &str, condition: WaitCondition, timeout: Option<Duration>) -> bool {
        let timer = self.recorder.scoped_timer("browser.wait_for_selector");
        let timeout = timeout.unwrap_or(self.default_wait);
        let engine = self.engine.clone();
        let selector = selector.to_string();
        let found = crate::timing::wait_for(
            move || {
                let engine = engine.clone();
                let selector = selector.clone();
                async move { engine.find(&selector, condition).await.ok().filter(|found| *found) }
            },
            timeout,
        )
        .await
        .is_some();
        timer.success();
        found
    }

    pub async fn click(&self, selector: &str, timeout: Option<Duration>) -> Result<bool, RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.click");
        if !self.wait_for_selector(selector, WaitCondition::Clickable, timeout).await {
            timer.success();
            return Ok(false);
        }
        let result = self.engine.click(selector).await;
        if result.is_ok() {
            timer.success();
        }
        result
    }

    pub async fn type_text(&self, selector: &str, text: &str, clear_first: bool, timeout: Option<Duration>) -> Result<bool, RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.type_text");
        if !self.wait_for_selector(selector, WaitCondition::Present, timeout).await {
            timer.success();
            return Ok(false);
        }
        let result = self.engine.type_text(selector, text, clear_first).await;
        if result.is_ok() {
            timer.success();
        }
        result
    }

    pub async fn read_text(&self, selector: &str) -> Result<Option<String>, RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.read_text");
        let result = self.engine.read_text(selector).await;
        if result.is_ok() {
            timer.success();
        }
        result
    }

    pub async fn evaluate(&self, script: &str) -> Result<Value, RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.evaluate");
        let result = self.engine.evaluate(script).await;
        if result.is_ok() {
            timer.success();
        }
        result
    }

    pub async fn screenshot(&self, path: &std::path::Path) -> Result<(), RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.screenshot");
        let result = self.engine.screenshot(path).await;
        if result.is_ok() {
            timer.success();
        }
        result
    }

    pub async fn close(&self) -> Result<(), RuntimeError> {
        let timer = self.recorder.scoped_timer("browser.close");
        let result = self.engine.close().await;
        if result.is_ok() {
            timer.success();
        }
        result
    }
}
