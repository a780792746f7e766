use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use headless_chrome::Tab;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, protocol::cdp::Page};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::core::encode::{Drawing, OutputFormat, Surface};
use crate::core::template::{self, MISSING_LIBRARY};
use crate::error::{RenderError, RenderResult};

const CSS_PX_PER_INCH: f64 = 96.0;

/// Everything needed to draw one chart, independent of the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: f64,
    pub height: f64,
    pub format: OutputFormat,
    pub surface: Surface,
    pub background: Option<String>,
    pub option: JsonValue,
    /// Document title, ends up in PDF metadata
    pub title: String,
}

/// A headless surface the chart library can be executed against.
///
/// Implementations are blocking; callers run them on a blocking thread.
pub trait ChartBackend: Send + Sync {
    fn ensure_available(&self) -> RenderResult<()>;

    fn draw(&self, scene: &Scene) -> RenderResult<Drawing>;
}

/// Disposes the chart and closes the tab on every exit path.
struct TabGuard {
    tab: Arc<Tab>,
}

impl TabGuard {
    fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    fn as_ref(&self) -> &Arc<Tab> {
        &self.tab
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        if let Err(e) = self
            .tab
            .evaluate("window.renderChart && window.renderChart.dispose()", false)
        {
            tracing::debug!("Chart dispose skipped: {}", e);
        }
        if let Err(e) = self.tab.close(true) {
            tracing::warn!("Failed to close tab during cleanup: {}", e);
        } else {
            tracing::debug!("Tab closed successfully");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub echarts_url: String,
    pub chrome_path: Option<PathBuf>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Runs ECharts inside headless Chromium. Every draw gets its own tab, so
/// concurrent renders never share a window or document.
#[derive(Clone)]
pub struct ChromeBackend {
    browser: Arc<Mutex<Option<Browser>>>,
    options: Arc<ChromeOptions>,
}

impl ChromeBackend {
    /// The browser is launched on first use.
    pub fn new(options: ChromeOptions) -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            options: Arc::new(options),
        }
    }

    fn launch_options(&self) -> RenderResult<LaunchOptions<'static>> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-setuid-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-networking"),
                OsStr::new("--disable-sync"),
                OsStr::new("--mute-audio"),
                OsStr::new("--no-first-run"),
                OsStr::new("--disable-default-apps"),
                OsStr::new("--hide-scrollbars"),
            ])
            .build()
            .map_err(|e| RenderError::dependency(format!("invalid browser options: {e}")))?;
        if let Some(path) = &self.options.chrome_path {
            launch_options.path = Some(path.clone());
        }
        Ok(launch_options)
    }

    fn get_or_create_browser(&self) -> RenderResult<Browser> {
        let mut browser_lock = self.browser.lock();

        if let Some(ref browser) = *browser_lock {
            match browser.get_version() {
                Ok(_) => return Ok(browser.clone()),
                Err(e) => {
                    tracing::warn!("Browser health check failed, recreating: {}", e);
                    *browser_lock = None;
                }
            }
        }

        tracing::info!("Launching headless browser");
        let new_browser = Browser::new(self.launch_options()?).map_err(|e| {
            tracing::error!("Cannot launch headless browser: {}", e);
            RenderError::dependency(format!(
                "looks like it is not possible to generate charts on this host, \
                 install Chromium or set CHROME_PATH ({e})"
            ))
        })?;
        *browser_lock = Some(new_browser.clone());

        Ok(new_browser)
    }

    fn prepare_tab(&self, tab: &Arc<Tab>, scene: &Scene) -> RenderResult<()> {
        let width = scene.width.ceil() as u32;
        let height = scene.height.ceil() as u32;

        tab.set_bounds(headless_chrome::types::Bounds::Normal {
            left: Some(0),
            top: Some(0),
            width: Some(width as f64),
            height: Some(height as f64),
        })
        .map_err(RenderError::backend)?;

        tab.call_method(
            headless_chrome::protocol::cdp::Emulation::SetDeviceMetricsOverride {
                width,
                height,
                device_scale_factor: 1.0,
                mobile: false,
                scale: None,
                screen_width: Some(width),
                screen_height: Some(height),
                position_x: Some(0),
                position_y: Some(0),
                dont_set_visible_size: None,
                screen_orientation: None,
                viewport: None,
                display_feature: None,
                device_posture: None,
            },
        )
        .map_err(RenderError::backend)?;

        if scene.surface == Surface::Raster {
            // canvas output stays transparent where the chart paints nothing
            tab.call_method(
                headless_chrome::protocol::cdp::Emulation::SetDefaultBackgroundColorOverride {
                    color: Some(headless_chrome::protocol::cdp::DOM::RGBA {
                        r: 0,
                        g: 0,
                        b: 0,
                        a: Some(0.0),
                    }),
                },
            )
            .map_err(RenderError::backend)?;
        }

        let html = template::generate_html(scene, &self.options.echarts_url)
            .map_err(RenderError::backend)?;
        let data_url = format!(
            "data:text/html;base64,{}",
            general_purpose::STANDARD.encode(&html)
        );
        tab.navigate_to(&data_url).map_err(RenderError::backend)?;

        tab.wait_for_element_with_custom_timeout("#render-container", self.options.timeout)
            .map_err(RenderError::backend)?;

        self.wait_for_render_ready(tab)
    }

    fn wait_for_render_ready(&self, tab: &Arc<Tab>) -> RenderResult<()> {
        let poll_interval = self.options.poll_interval;
        let max_attempts =
            (self.options.timeout.as_millis() / poll_interval.as_millis().max(1)).max(1);
        let mut attempts = 0;

        while attempts < max_attempts {
            let ready: bool = tab
                .evaluate("window.renderReady === true", false)
                .map_err(RenderError::backend)?
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            if ready {
                tracing::debug!("Render ready after {} attempts", attempts);
                return Ok(());
            }

            let error: Option<String> = tab
                .evaluate("window.renderError", false)
                .map_err(RenderError::backend)?
                .value
                .and_then(|v| v.as_str().map(String::from));

            match error.as_deref() {
                Some(MISSING_LIBRARY) => {
                    return Err(RenderError::dependency(format!(
                        "ECharts could not be loaded from {}",
                        self.options.echarts_url
                    )));
                }
                Some(err) => {
                    return Err(RenderError::Backend(format!(
                        "Render initialization failed: {err}"
                    )));
                }
                None => {}
            }

            sleep(poll_interval);
            attempts += 1;
        }

        Err(RenderError::Backend(format!(
            "Timeout waiting for render to complete after {} attempts",
            max_attempts
        )))
    }

    fn capture(&self, tab: &Arc<Tab>, scene: &Scene) -> RenderResult<Drawing> {
        let drawing = match scene.format {
            OutputFormat::Svg => {
                let markup = tab
                    .evaluate(
                        "(() => { const svg = document.querySelector('#render-container svg'); \
                         return svg ? svg.outerHTML : null; })()",
                        false,
                    )
                    .map_err(RenderError::backend)?
                    .value
                    .and_then(|v| v.as_str().map(String::from))
                    .ok_or_else(|| RenderError::Backend("no <svg> element rendered".to_string()))?;
                Drawing::Markup(markup)
            }
            OutputFormat::Png | OutputFormat::Jpg => {
                let clip = Page::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: scene.width,
                    height: scene.height,
                    scale: 1.0,
                };
                let bytes = tab
                    .capture_screenshot(
                        Page::CaptureScreenshotFormatOption::Png,
                        None,
                        Some(clip),
                        true,
                    )
                    .map_err(RenderError::backend)?;
                Drawing::Bitmap(bytes)
            }
            OutputFormat::Pdf => {
                let options = PrintToPdfOptions {
                    print_background: Some(true),
                    paper_width: Some(scene.width / CSS_PX_PER_INCH),
                    paper_height: Some(scene.height / CSS_PX_PER_INCH),
                    margin_top: Some(0.0),
                    margin_bottom: Some(0.0),
                    margin_left: Some(0.0),
                    margin_right: Some(0.0),
                    prefer_css_page_size: Some(true),
                    ..Default::default()
                };
                Drawing::Document(tab.print_to_pdf(Some(options)).map_err(RenderError::backend)?)
            }
        };
        Ok(drawing)
    }
}

impl ChartBackend for ChromeBackend {
    fn ensure_available(&self) -> RenderResult<()> {
        self.get_or_create_browser().map(|_| ())
    }

    fn draw(&self, scene: &Scene) -> RenderResult<Drawing> {
        let browser = self.get_or_create_browser()?;
        let tab = browser.new_tab().map_err(RenderError::backend)?;
        let tab_guard = TabGuard::new(tab);
        let tab = tab_guard.as_ref();

        self.prepare_tab(tab, scene)?;
        self.capture(tab, scene)
    }
}
