use image::ImageError;
use thiserror::Error;

/// Usage hint returned when a message arrives without a preset.
pub const USAGE_HINT: &str = r#"Please define settings: {"preset": "echarts.0.XXX", width: 500, height: 200, renderer: "svg/png"}"#;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Cannot find required modules: {hint}")]
    DependencyUnavailable { hint: String },
    #[error("{0}")]
    SourceResolution(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Unsupported renderer: {0}")]
    UnsupportedRenderer(String),
    #[error("{hint}", hint = USAGE_HINT)]
    MissingPreset,
    #[error("Cannot write file {0}")]
    FilesystemWrite(String),
    #[error("Rendering failed: {0}")]
    Backend(String),
    #[error("Image encoding failed: {0}")]
    Encode(#[from] ImageError),
}

impl RenderError {
    pub fn dependency(hint: impl Into<String>) -> Self {
        Self::DependencyUnavailable { hint: hint.into() }
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
