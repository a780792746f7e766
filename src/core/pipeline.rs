//! The render pipeline: preset in, encoded image out.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;

use crate::core::encode::{
    DEFAULT_JPEG_QUALITY, EncodeOptions, OutputFormat, PngOptions, RenderedImage, Surface, encode,
};
use crate::core::model::ChartModel;
use crate::core::option::OptionBuilder;
use crate::core::renderer::{ChartBackend, Scene};
use crate::core::sink::{FileStore, write_on_disk};
use crate::core::source::{DataSource, json_number};
use crate::core::theme::Theme;
use crate::error::{RenderError, RenderResult};
use crate::schemas::render::RenderMessage;

pub const DEFAULT_WIDTH: f64 = 1024.0;
pub const DEFAULT_HEIGHT: f64 = 300.0;
pub const DEFAULT_TITLE: &str = "ioBroker Chart";

/// A validated render request with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub preset: String,
    pub width: f64,
    pub height: f64,
    pub theme: Theme,
    pub format: OutputFormat,
    pub background: Option<String>,
    pub encode: EncodeOptions,
    pub title: String,
    pub file_name: Option<String>,
    pub file_on_disk: Option<PathBuf>,
}

impl RenderRequest {
    pub fn new(preset: impl Into<String>) -> Self {
        Self {
            preset: preset.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            theme: Theme::Light,
            format: OutputFormat::Svg,
            background: None,
            encode: EncodeOptions::default(),
            title: DEFAULT_TITLE.to_string(),
            file_name: None,
            file_on_disk: None,
        }
    }

    pub fn from_message(message: &RenderMessage) -> RenderResult<Self> {
        let preset = message
            .preset
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(RenderError::MissingPreset)?;
        let format = OutputFormat::parse(message.renderer.as_deref())?;

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

        Ok(Self {
            preset: preset.to_string(),
            width: coerce_dimension(message.width.as_ref(), DEFAULT_WIDTH),
            height: coerce_dimension(message.height.as_ref(), DEFAULT_HEIGHT),
            theme: Theme::parse(message.theme.as_deref().or(message.theme_type.as_deref())),
            format,
            background: non_empty(&message.background),
            encode: EncodeOptions {
                png: PngOptions {
                    compression_level: positive_number(message.compression_level.as_ref())
                        .map(|l| l.trunc().min(9.0) as u8)
                        .filter(|l| *l > 0)
                        .unwrap_or(PngOptions::default().compression_level),
                    filters: positive_number(message.filters.as_ref())
                        .map(|f| f.trunc() as u32)
                        .filter(|f| *f > 0)
                        .unwrap_or(PngOptions::default().filters),
                },
                quality: positive_number(message.quality.as_ref()).unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            title: non_empty(&message.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            file_name: non_empty(&message.file_name),
            file_on_disk: non_empty(&message.file_on_disk).map(PathBuf::from),
        })
    }
}

/// Finite number above zero; `0`, negatives and junk mean "use the default".
fn positive_number(value: Option<&JsonValue>) -> Option<f64> {
    value
        .and_then(json_number)
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Positive number from a number or a string with a leading number, else `default`.
pub fn coerce_dimension(value: Option<&JsonValue>, default: f64) -> f64 {
    let parsed = match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => parse_float_prefix(s),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

/// Longest numeric prefix, so `"500px"` reads as 500.
fn parse_float_prefix(raw: &str) -> Option<f64> {
    let s = raw.trim_start();
    let end = s
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    (1..=end)
        .rev()
        .filter(|i| s.is_char_boundary(*i))
        .find_map(|i| s[..i].parse::<f64>().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStatus {
    pub available: usize,
    pub capacity: usize,
}

pub struct RenderPipeline {
    source: Arc<dyn DataSource>,
    backend: Arc<dyn ChartBackend>,
    files: Arc<dyn FileStore>,
    namespace: String,
    slots: Semaphore,
    capacity: usize,
    disk_root: Option<PathBuf>,
}

impl RenderPipeline {
    /// `max_concurrent` bounds renders in flight; 1 serializes them.
    pub fn new(
        source: Arc<dyn DataSource>,
        backend: Arc<dyn ChartBackend>,
        files: Arc<dyn FileStore>,
        namespace: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            source,
            backend,
            files,
            namespace: namespace.into(),
            slots: Semaphore::new(capacity),
            capacity,
            disk_root: None,
        }
    }

    /// Confines `fileOnDisk` writes to absolute paths below `root`.
    pub fn with_disk_root(mut self, root: Option<PathBuf>) -> Self {
        self.disk_root = root;
        self
    }

    fn check_disk_path(&self, path: &Path) -> RenderResult<()> {
        let Some(root) = &self.disk_root else {
            return Ok(());
        };
        let inside = path.is_absolute()
            && !path.components().any(|c| matches!(c, Component::ParentDir))
            && path.starts_with(root)
            && path != root;
        if inside {
            Ok(())
        } else {
            Err(RenderError::FilesystemWrite(format!(
                "{}: outside of {}",
                path.display(),
                root.display()
            )))
        }
    }

    pub fn status(&self) -> RenderStatus {
        RenderStatus {
            available: self.slots.available_permits(),
            capacity: self.capacity,
        }
    }

    pub async fn render(&self, request: RenderRequest) -> RenderResult<RenderedImage> {
        tracing::info!(
            "Rendering: preset={}, size={}x{}, format={}, theme={}",
            request.preset,
            request.width,
            request.height,
            request.format.as_str(),
            request.theme.as_str()
        );
        let result = self.render_inner(&request).await;
        match &result {
            Ok(image) => tracing::info!(
                "Render of {} completed, {} base64 chars",
                request.preset,
                image.base64.len()
            ),
            Err(e) => tracing::error!("Render of {} failed: {}", request.preset, e),
        }
        result
    }

    async fn render_inner(&self, request: &RenderRequest) -> RenderResult<RenderedImage> {
        if let Some(path) = &request.file_on_disk {
            self.check_disk_path(path)?;
        }
        let _permit = self.slots.acquire().await.map_err(RenderError::backend)?;

        let backend = self.backend.clone();
        run_blocking(move || backend.ensure_available()).await?;

        let data = ChartModel::resolve(
            self.source.as_ref(),
            &request.preset,
            Utc::now().timestamp_millis(),
        )
        .await?;

        let option = OptionBuilder::new(data.system_config.language.clone(), request.theme)
            .build(&data);

        let surface = request.format.surface();
        // the theme paints the SVG container only; bitmaps stay transparent
        let background = request.background.clone().or_else(|| match surface {
            Surface::Vector => request.theme.palette().background.map(str::to_string),
            Surface::Raster => None,
        });
        let scene = Scene {
            width: request.width,
            height: request.height,
            format: request.format,
            surface,
            background,
            option,
            title: request.title.clone(),
        };

        let backend = self.backend.clone();
        let drawing = run_blocking(move || backend.draw(&scene)).await?;
        let bytes = encode(request.format, drawing, &request.encode)?;
        let image = RenderedImage::from_bytes(request.format, &bytes);

        if let Some(path) = &request.file_on_disk {
            write_on_disk(path, &bytes).await?;
        }
        if let Some(name) = &request.file_name {
            self.files.write_file(&self.namespace, name, &bytes).await?;
        }

        Ok(image)
    }
}

async fn run_blocking<T, F>(f: F) -> RenderResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RenderResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RenderError::Backend(format!("Task join error: {e}")))?
}
