//! Output formats and the per-format encoders.

use base64::{Engine as _, engine::general_purpose};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::{RenderError, RenderResult};

pub const DEFAULT_COMPRESSION_LEVEL: u8 = 3;
pub const DEFAULT_JPEG_QUALITY: f64 = 0.8;

/// node-canvas PNG filter flags, kept so existing callers can pass them through.
pub const PNG_NO_FILTERS: u32 = 0;
pub const PNG_FILTER_NONE: u32 = 8;
pub const PNG_FILTER_SUB: u32 = 16;
pub const PNG_FILTER_UP: u32 = 32;
pub const PNG_FILTER_AVG: u32 = 64;
pub const PNG_FILTER_PAETH: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Svg,
    Png,
    Jpg,
    Pdf,
}

/// What the chart library draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Vector,
    Raster,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Svg,
        OutputFormat::Png,
        OutputFormat::Jpg,
        OutputFormat::Pdf,
    ];

    /// Unset or empty means SVG.
    pub fn parse(value: Option<&str>) -> RenderResult<Self> {
        match value.unwrap_or("") {
            "" | "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            "jpg" => Ok(OutputFormat::Jpg),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(RenderError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpg => "image/jpeg",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn surface(&self) -> Surface {
        match self {
            OutputFormat::Svg => Surface::Vector,
            OutputFormat::Png | OutputFormat::Jpg | OutputFormat::Pdf => Surface::Raster,
        }
    }
}

/// Raw output of a drawing backend before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Drawing {
    /// Serialized `<svg>` element
    Markup(String),
    /// PNG-encoded screenshot of the raster surface
    Bitmap(Vec<u8>),
    /// Printed PDF document
    Document(Vec<u8>),
}

impl Drawing {
    fn kind(&self) -> &'static str {
        match self {
            Drawing::Markup(_) => "markup",
            Drawing::Bitmap(_) => "bitmap",
            Drawing::Document(_) => "document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PngOptions {
    /// zlib level 0-9
    pub compression_level: u8,
    pub filters: u32,
}

impl Default for PngOptions {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            filters: PNG_FILTER_NONE,
        }
    }
}

impl PngOptions {
    fn compression(&self) -> CompressionType {
        match self.compression_level {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }

    fn filter(&self) -> FilterType {
        match self.filters {
            PNG_NO_FILTERS | PNG_FILTER_NONE => FilterType::NoFilter,
            PNG_FILTER_SUB => FilterType::Sub,
            PNG_FILTER_UP => FilterType::Up,
            PNG_FILTER_AVG => FilterType::Avg,
            PNG_FILTER_PAETH => FilterType::Paeth,
            _ => FilterType::Adaptive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    pub png: PngOptions,
    /// JPEG quality, 0-1 (values above 1 are read as percent)
    pub quality: f64,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            png: PngOptions::default(),
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

pub fn encode(
    format: OutputFormat,
    drawing: Drawing,
    options: &EncodeOptions,
) -> RenderResult<Vec<u8>> {
    match (format, drawing) {
        (OutputFormat::Svg, Drawing::Markup(markup)) => Ok(encode_svg(markup)),
        (OutputFormat::Png, Drawing::Bitmap(bitmap)) => encode_png(&bitmap, &options.png),
        (OutputFormat::Jpg, Drawing::Bitmap(bitmap)) => encode_jpeg(&bitmap, options.quality),
        (OutputFormat::Pdf, Drawing::Document(document)) => encode_pdf(document),
        (format, drawing) => Err(RenderError::Backend(format!(
            "backend returned {} for {}",
            drawing.kind(),
            format.as_str()
        ))),
    }
}

fn encode_svg(markup: String) -> Vec<u8> {
    markup.into_bytes()
}

fn encode_png(bitmap: &[u8], options: &PngOptions) -> RenderResult<Vec<u8>> {
    let img = image::load_from_memory(bitmap)?;
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, options.compression(), options.filter());
    img.write_with_encoder(encoder)?;
    Ok(out)
}

fn encode_jpeg(bitmap: &[u8], quality: f64) -> RenderResult<Vec<u8>> {
    let img = image::load_from_memory(bitmap)?;
    let flat = DynamicImage::ImageRgb8(flatten_on_white(&img));
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality(quality));
    flat.write_with_encoder(encoder)?;
    Ok(out)
}

fn encode_pdf(document: Vec<u8>) -> RenderResult<Vec<u8>> {
    if !document.starts_with(b"%PDF") {
        return Err(RenderError::Backend("printer did not return a PDF".to_string()));
    }
    Ok(document)
}

/// JPEG has no alpha; transparent pixels end up white, not black.
fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

pub fn jpeg_quality(quality: f64) -> u8 {
    let percent = if !quality.is_finite() || quality <= 0.0 {
        DEFAULT_JPEG_QUALITY * 100.0
    } else if quality <= 1.0 {
        quality * 100.0
    } else {
        quality
    };
    percent.round().clamp(1.0, 100.0) as u8
}

/// An encoded image ready to answer a request with.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub format: OutputFormat,
    pub base64: String,
}

impl RenderedImage {
    pub fn from_bytes(format: OutputFormat, bytes: &[u8]) -> Self {
        Self {
            format,
            base64: general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.base64)
    }

    pub fn decode(&self) -> RenderResult<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.base64)
            .map_err(RenderError::backend)
    }
}

/// Splits `data:<mime>;base64,<payload>` into mime and payload.
pub fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn bitmap(alpha: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(8, 4, Rgba([200, 10, 10, alpha]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn parse_accepts_known_formats_only() {
        assert_eq!(OutputFormat::parse(None).unwrap(), OutputFormat::Svg);
        assert_eq!(OutputFormat::parse(Some("")).unwrap(), OutputFormat::Svg);
        assert_eq!(OutputFormat::parse(Some("jpg")).unwrap(), OutputFormat::Jpg);
        let err = OutputFormat::parse(Some("gif")).unwrap_err();
        assert!(err.to_string().starts_with("Unsupported format"));
        assert!(OutputFormat::parse(Some("jpeg")).is_err());
    }

    #[test]
    fn png_reencode_keeps_dimensions() {
        let options = PngOptions {
            compression_level: 9,
            filters: PNG_FILTER_PAETH,
        };
        let out = encode(OutputFormat::Png, Drawing::Bitmap(bitmap(255)), &EncodeOptions {
            png: options,
            ..EncodeOptions::default()
        })
        .unwrap();
        assert!(out.starts_with(&[0x89, b'P', b'N', b'G']));
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn jpeg_flattens_transparency_on_white() {
        let out = encode(
            OutputFormat::Jpg,
            Drawing::Bitmap(bitmap(0)),
            &EncodeOptions::default(),
        )
        .unwrap();
        assert!(out.starts_with(&[0xFF, 0xD8]));
        let decoded = image::load_from_memory(&out).unwrap().to_rgb8();
        let px = decoded.get_pixel(0, 0).0;
        assert!(px.iter().all(|c| *c > 240), "expected white, got {px:?}");
    }

    #[test]
    fn quality_scales() {
        assert_eq!(jpeg_quality(0.8), 80);
        assert_eq!(jpeg_quality(0.0), 80);
        assert_eq!(jpeg_quality(95.0), 95);
        assert_eq!(jpeg_quality(500.0), 100);
    }

    #[test]
    fn mismatched_drawing_is_rejected() {
        let err = encode(
            OutputFormat::Pdf,
            Drawing::Markup("<svg/>".to_string()),
            &EncodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Backend(_)));
    }

    #[test]
    fn data_uri_round_trips_payload() {
        let image = RenderedImage::from_bytes(OutputFormat::Svg, b"<svg></svg>");
        let uri = image.data_uri();
        assert!(uri.starts_with("data:image/svg+xml;base64,"));
        let (mime, payload) = split_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/svg+xml");
        assert_eq!(payload, image.base64);
        assert_eq!(image.decode().unwrap(), b"<svg></svg>");
    }
}
