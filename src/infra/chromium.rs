//! Headless Chromium render engine driven over the DevTools protocol.
//!
//! One browser process is launched on first use and kept for every later
//! render. Each render gets its own browser context, so pages never share
//! cookies, storage or cache entries.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::{
        browser_protocol::{
            browser::{BrowserContextId, CloseParams},
            emulation::SetDeviceMetricsOverrideParams,
            page::CaptureScreenshotFormat,
            target::{CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams},
        },
        js_protocol::runtime::EvaluateParams,
    },
    error::CdpError,
    page::{Page, ScreenshotParams},
};
use futures::StreamExt;
use metrics::counter;
use tempfile::TempDir;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::application::rasterize::{RenderContext, RenderEngine, RenderError};
use crate::domain::template::Resolution;

const METRIC_BROWSER_LAUNCHES_TOTAL: &str = "gambit_export_browser_launches_total";

/// Resolves once the composed document's readiness sequence has settled.
const READY_EXPRESSION: &str = "Promise.resolve(window.__cardRenderReady).then(() => true)";

/// Starts the browser the engine keeps alive between renders.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, RenderError>;
}

/// A running browser handing out isolated pages.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// False once the browser process or its connection has gone away.
    fn is_alive(&self) -> bool;

    async fn open_page(&self) -> Result<Box<dyn RenderContext>, RenderError>;

    async fn close(&self);
}

pub struct ChromiumEngine {
    launcher: Arc<dyn BrowserLauncher>,
    session: Mutex<Option<Arc<dyn BrowserSession>>>,
    launches: AtomicU64,
}

impl ChromiumEngine {
    /// `readiness_timeout` bounds the wait for the in-page readiness
    /// sequence; `capture_timeout` is the wall-clock limit of every browser
    /// round trip.
    pub fn new(binary: PathBuf, readiness_timeout: Duration, capture_timeout: Duration) -> Self {
        Self::with_launcher(Arc::new(DevToolsLauncher {
            binary,
            readiness_timeout,
            capture_timeout,
        }))
    }

    pub fn with_launcher(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            session: Mutex::new(None),
            launches: AtomicU64::new(0),
        }
    }

    /// Browser processes started so far.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    async fn ensure_started(&self) -> Result<Arc<dyn BrowserSession>, RenderError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_alive() {
                return Ok(Arc::clone(session));
            }
            warn!(
                target = "infra::chromium",
                op = "chromium::start",
                "Browser exited; launching a new one"
            );
            *guard = None;
        }

        let started_at = Instant::now();
        let session: Arc<dyn BrowserSession> = Arc::from(self.launcher.launch().await?);
        self.launches.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_BROWSER_LAUNCHES_TOTAL).increment(1);
        info!(
            target = "infra::chromium",
            op = "chromium::start",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Chromium engine ready"
        );
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        let session = self.ensure_started().await?;
        session.open_page().await
    }

    async fn shutdown(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
            info!(
                target = "infra::chromium",
                op = "chromium::shutdown",
                "Chromium engine released"
            );
        }
    }
}

/// Launches a local Chromium binary and talks to it over its DevTools socket.
struct DevToolsLauncher {
    binary: PathBuf,
    readiness_timeout: Duration,
    capture_timeout: Duration,
}

#[async_trait]
impl BrowserLauncher for DevToolsLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, RenderError> {
        let profile = tempfile::Builder::new()
            .prefix("gambit-chromium-")
            .tempdir()?;
        let config = BrowserConfig::builder()
            .chrome_executable(&self.binary)
            .user_data_dir(profile.path())
            .launch_timeout(self.capture_timeout)
            .request_timeout(self.capture_timeout)
            .arg("--hide-scrollbars")
            .arg("--force-device-scale-factor=1")
            .arg("--default-background-color=00000000")
            .arg("--run-all-compositor-stages-before-draw")
            .build()
            .map_err(RenderError::Unavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| launch_error(&self.binary, err))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(
                        target = "infra::chromium",
                        error = %err,
                        "DevTools event error"
                    );
                }
            }
        });

        let browser = Arc::new(browser);
        match browser.version().await {
            Ok(version) => info!(
                target = "infra::chromium",
                op = "chromium::start",
                version = %version.product,
                "Chromium launched"
            ),
            Err(err) => warn!(
                target = "infra::chromium",
                op = "chromium::start",
                error = %err,
                "Chromium version unavailable"
            ),
        }

        Ok(Box::new(DevToolsSession {
            browser,
            handler,
            readiness_timeout: self.readiness_timeout,
            capture_timeout: self.capture_timeout,
            _profile: profile,
        }))
    }
}

fn launch_error(binary: &Path, err: CdpError) -> RenderError {
    warn!(
        target = "infra::chromium",
        op = "chromium::start",
        result = "error",
        binary = %binary.display(),
        error = %err,
        "Failed to launch Chromium"
    );
    match err {
        CdpError::Io(io) if io.kind() == ErrorKind::NotFound => {
            RenderError::Unavailable(format!("{} not found", binary.display()))
        }
        other => RenderError::Unavailable(other.to_string()),
    }
}

fn protocol_error(err: CdpError) -> RenderError {
    RenderError::Protocol(err.to_string())
}

struct DevToolsSession {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    readiness_timeout: Duration,
    capture_timeout: Duration,
    _profile: TempDir,
}

#[async_trait]
impl BrowserSession for DevToolsSession {
    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn open_page(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        let context_id = bounded(
            self.capture_timeout,
            "chromium::open_context",
            self.browser.execute(CreateBrowserContextParams::default()),
        )
        .await?
        .result
        .browser_context_id;

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context_id.clone());
        let page = match bounded(
            self.capture_timeout,
            "chromium::open_context",
            self.browser.new_page(target),
        )
        .await
        {
            Ok(page) => page,
            Err(err) => {
                dispose_context(&self.browser, context_id).await;
                return Err(err);
            }
        };

        Ok(Box::new(DevToolsPage {
            browser: Arc::clone(&self.browser),
            page: Some(page),
            context_id: Some(context_id),
            readiness_timeout: self.readiness_timeout,
            capture_timeout: self.capture_timeout,
            loaded: false,
        }))
    }

    async fn close(&self) {
        if let Err(err) = self.browser.execute(CloseParams::default()).await {
            debug!(
                target = "infra::chromium",
                op = "chromium::shutdown",
                error = %err,
                "Browser close request failed"
            );
        }
        self.handler.abort();
    }
}

async fn bounded<T, F>(limit: Duration, op: &'static str, step: F) -> Result<T, RenderError>
where
    F: Future<Output = Result<T, CdpError>>,
{
    match tokio::time::timeout(limit, step).await {
        Ok(result) => result.map_err(protocol_error),
        Err(_) => {
            warn!(
                target = "infra::chromium",
                op,
                result = "timeout",
                timeout_ms = limit.as_millis() as u64,
                "Chromium did not answer in time"
            );
            Err(RenderError::Timeout(limit))
        }
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(err) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        debug!(
            target = "infra::chromium",
            error = %err,
            "Failed to dispose browser context"
        );
    }
}

/// One render: a page inside its own browser context. Dropping it closes
/// the page and disposes of the context.
struct DevToolsPage {
    browser: Arc<Browser>,
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    readiness_timeout: Duration,
    capture_timeout: Duration,
    loaded: bool,
}

impl DevToolsPage {
    fn page(&self) -> Result<&Page, RenderError> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Protocol("page already closed".to_string()))
    }

    async fn await_ready(&self, page: &Page) {
        let mut params = EvaluateParams::new(READY_EXPRESSION);
        params.await_promise = Some(true);
        params.return_by_value = Some(true);

        let started_at = Instant::now();
        match tokio::time::timeout(self.readiness_timeout, page.evaluate_expression(params)).await {
            Ok(Ok(_)) => debug!(
                target = "infra::chromium",
                op = "chromium::ready",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Document ready"
            ),
            Ok(Err(err)) => warn!(
                target = "infra::chromium",
                op = "chromium::ready",
                result = "error",
                error = %err,
                "Readiness check failed; capturing anyway"
            ),
            Err(_) => warn!(
                target = "infra::chromium",
                op = "chromium::ready",
                result = "timeout",
                timeout_ms = self.readiness_timeout.as_millis() as u64,
                "Document not ready in time; capturing anyway"
            ),
        }
    }
}

#[async_trait]
impl RenderContext for DevToolsPage {
    async fn load(&mut self, document: &str) -> Result<(), RenderError> {
        let page = self.page()?;
        bounded(self.capture_timeout, "chromium::load", async {
            page.set_content(document).await.map(|_| ())
        })
        .await?;
        self.await_ready(page).await;
        self.loaded = true;
        Ok(())
    }

    async fn capture(&mut self, viewport: Resolution) -> Result<Vec<u8>, RenderError> {
        if !self.loaded {
            return Err(RenderError::NothingLoaded);
        }
        let page = self.page()?;
        let started_at = Instant::now();

        bounded(
            self.capture_timeout,
            "chromium::capture",
            page.execute(SetDeviceMetricsOverrideParams::new(
                i64::from(viewport.width),
                i64::from(viewport.height),
                1.0,
                false,
            )),
        )
        .await?;
        let png = bounded(
            self.capture_timeout,
            "chromium::capture",
            page.screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .omit_background(true)
                    .build(),
            ),
        )
        .await?;

        info!(
            target = "infra::chromium",
            op = "chromium::capture",
            result = "ok",
            width = viewport.width,
            height = viewport.height,
            png_bytes = png.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Chromium capture complete"
        );
        Ok(png)
    }
}

impl Drop for DevToolsPage {
    fn drop(&mut self) {
        let page = self.page.take();
        let context_id = self.context_id.take();
        let browser = Arc::clone(&self.browser);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            if let Some(page) = page {
                if let Err(err) = page.close().await {
                    debug!(
                        target = "infra::chromium",
                        error = %err,
                        "Failed to close page"
                    );
                }
            }
            if let Some(context_id) = context_id {
                dispose_context(&browser, context_id).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn viewport() -> Resolution {
        Resolution {
            width: 750,
            height: 1050,
        }
    }

    #[derive(Default)]
    struct CountingLauncher {
        launches: Arc<AtomicUsize>,
        pages: Arc<AtomicUsize>,
        crashed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserLauncher for CountingLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, RenderError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.crashed.store(false, Ordering::SeqCst);
            Ok(Box::new(StubSession {
                pages: Arc::clone(&self.pages),
                crashed: Arc::clone(&self.crashed),
            }))
        }
    }

    struct StubSession {
        pages: Arc<AtomicUsize>,
        crashed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserSession for StubSession {
        fn is_alive(&self) -> bool {
            !self.crashed.load(Ordering::SeqCst)
        }

        async fn open_page(&self) -> Result<Box<dyn RenderContext>, RenderError> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubPage { document: None }))
        }

        async fn close(&self) {}
    }

    struct StubPage {
        document: Option<String>,
    }

    #[async_trait]
    impl RenderContext for StubPage {
        async fn load(&mut self, document: &str) -> Result<(), RenderError> {
            self.document = Some(document.to_string());
            Ok(())
        }

        async fn capture(&mut self, _viewport: Resolution) -> Result<Vec<u8>, RenderError> {
            self.document
                .as_ref()
                .map(|document| document.clone().into_bytes())
                .ok_or(RenderError::NothingLoaded)
        }
    }

    async fn render(engine: &ChromiumEngine, document: &str) -> Vec<u8> {
        let mut context = engine.open_context().await.expect("context");
        context.load(document).await.expect("load");
        context.capture(viewport()).await.expect("capture")
    }

    #[tokio::test]
    async fn one_browser_serves_every_render() {
        let launcher = Arc::new(CountingLauncher::default());
        let launches = Arc::clone(&launcher.launches);
        let pages = Arc::clone(&launcher.pages);
        let engine = ChromiumEngine::with_launcher(launcher);

        for card in ["c1", "c2", "c3"] {
            assert_eq!(render(&engine, card).await, card.as_bytes());
        }

        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert_eq!(engine.launches(), 1);
        assert_eq!(pages.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn browser_is_relaunched_after_shutdown_or_exit() {
        let launcher = Arc::new(CountingLauncher::default());
        let launches = Arc::clone(&launcher.launches);
        let crashed = Arc::clone(&launcher.crashed);
        let engine = ChromiumEngine::with_launcher(launcher);

        render(&engine, "first").await;
        engine.shutdown().await;
        render(&engine, "second").await;
        assert_eq!(launches.load(Ordering::SeqCst), 2);

        crashed.store(true, Ordering::SeqCst);
        render(&engine, "third").await;
        render(&engine, "fourth").await;
        assert_eq!(launches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_renders_share_one_launch() {
        let launcher = Arc::new(CountingLauncher::default());
        let launches = Arc::clone(&launcher.launches);
        let engine = Arc::new(ChromiumEngine::with_launcher(launcher));

        let renders = (0..4).map(|n| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { render(&engine, &format!("card-{n}")).await })
        });
        for task in renders {
            task.await.expect("render task");
        }
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = ChromiumEngine::new(
            PathBuf::from("/nonexistent/chromium"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(
            engine.open_context().await.map(|_| ()),
            Err(RenderError::Unavailable(_))
        ));
        assert_eq!(engine.launches(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn binary_without_devtools_endpoint_is_unavailable() {
        use std::{fs, os::unix::fs::PermissionsExt};

        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fake-chromium");
        fs::write(&script, "#!/bin/sh\necho \"not a browser\" >&2\nexit 1\n")
            .expect("write script");
        let mut perms = fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).expect("set perms");

        let engine = ChromiumEngine::new(script, Duration::from_secs(1), Duration::from_secs(5));
        assert!(matches!(
            engine.open_context().await.map(|_| ()),
            Err(RenderError::Unavailable(_))
        ));
        assert_eq!(engine.launches(), 0);
    }

    #[tokio::test]
    #[ignore = "requires CHROMIUM_BIN"]
    async fn renders_documents_with_a_real_browser() {
        let binary = std::env::var("CHROMIUM_BIN").expect("CHROMIUM_BIN");
        let engine = ChromiumEngine::new(
            PathBuf::from(binary),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        let document = r#"<html><body style="margin:0;width:750px;height:1050px;background:#123">
<script>window.__cardRenderReady = Promise.resolve();</script></body></html>"#;

        for _ in 0..3 {
            let png = render(&engine, document).await;
            assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
            let size = imagesize::blob_size(&png).expect("png size");
            assert_eq!((size.width, size.height), (750, 1050));
        }
        assert_eq!(engine.launches(), 1);
        engine.shutdown().await;
    }
}
