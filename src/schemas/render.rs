use poem_openapi::{
    ApiResponse, Object,
    payload::{Attachment, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::common::{BadRequestResponse, InternalServerErrorResponse};

/// Render settings as they arrive over the wire. Dimensions and encoder
/// options may be numbers or numeric strings.
#[derive(Object, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[oai(rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub struct RenderMessage {
    /// Preset id, e.g. `echarts.0.Heating`
    pub preset: Option<String>,

    /// Image width in pixels (default 1024)
    pub width: Option<JsonValue>,

    /// Image height in pixels (default 300)
    pub height: Option<JsonValue>,

    /// Output format: svg (default), png, jpg or pdf
    pub renderer: Option<String>,

    /// light (default) or dark
    pub theme: Option<String>,

    /// Alias of `theme`
    pub theme_type: Option<String>,

    /// CSS background of the chart container
    pub background: Option<String>,

    /// PNG zlib compression level 0-9 (default 3)
    pub compression_level: Option<JsonValue>,

    /// PNG filter flags (8 none, 16 sub, 32 up, 64 avg, 128 paeth, other combinations adaptive)
    pub filters: Option<JsonValue>,

    /// JPEG quality 0-1 (default 0.8)
    pub quality: Option<JsonValue>,

    /// PDF document title (default "ioBroker Chart")
    pub title: Option<String>,

    /// Store the image under this name in the service's file namespace
    pub file_name: Option<String>,

    /// Also write the image to this absolute path
    pub file_on_disk: Option<String>,

    /// `/render` only: answer with a data URI instead of raw bytes
    pub return_base64: Option<bool>,
}

#[derive(Object, Serialize, Deserialize, Debug, Clone)]
pub struct SendCommand {
    /// Only `send` is handled
    pub command: String,
    /// Render settings, see `RenderMessage`
    pub message: Option<JsonValue>,
}

#[derive(Object, Serialize, Debug, Clone, Default, PartialEq)]
pub struct SendReply {
    /// Data URI of the rendered image
    #[oai(skip_serializing_if_is_none)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[oai(skip_serializing_if_is_none)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Object, Serialize)]
#[oai(rename_all = "camelCase")]
pub struct Base64Response {
    /// Data URI of the rendered image
    pub data: String,

    /// MIME type of the image
    pub mime_type: String,
}

#[derive(Object, Serialize)]
#[oai(rename_all = "camelCase")]
pub struct FormatInfo {
    pub name: String,
    pub mime_type: String,
}

#[derive(Object, Serialize)]
pub struct RenderSlots {
    pub available: u32,
    pub capacity: u32,
}

#[derive(Object, Serialize)]
#[oai(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub render_slots: RenderSlots,
}

#[derive(ApiResponse)]
pub enum SendResponse {
    /// Render result or error, as the message callback would receive it
    #[oai(status = 200)]
    Ok(Json<SendReply>),

    /// Same message seen moments ago; dropped
    #[oai(status = 409)]
    Filtered(Json<SendReply>),

    #[oai(status = 400)]
    BadRequest(Json<BadRequestResponse>),
}

#[derive(ApiResponse)]
pub enum RenderResponse {
    #[oai(status = 200, content_type = "application/octet-stream")]
    Binary(Attachment<Vec<u8>>),

    #[oai(status = 200, content_type = "application/json")]
    Base64(Json<Base64Response>),

    #[oai(status = 400)]
    BadRequest(Json<BadRequestResponse>),

    #[oai(status = 404)]
    NotFound(Json<BadRequestResponse>),

    #[oai(status = 500)]
    InternalServerError(Json<InternalServerErrorResponse>),

    #[oai(status = 503)]
    ServiceUnavailable(Json<InternalServerErrorResponse>),
}
