use std::sync::Arc;

use poem::web::Data;
use poem_openapi::{
    OpenApi, Tags,
    payload::{Attachment, Json},
};

use crate::{
    AppState,
    core::{
        dispatch::Dispatch,
        encode::OutputFormat,
        pipeline::RenderRequest,
    },
    error::RenderError,
    schemas::{
        common::{BadRequestResponse, InternalServerErrorResponse},
        render::{
            Base64Response, FormatInfo, HealthResponse, RenderMessage, RenderResponse,
            RenderSlots, SendCommand, SendReply, SendResponse,
        },
    },
};

#[derive(Tags)]
enum ApiRenderTags {
    Render,
}

pub struct ApiRender;

#[OpenApi()]
impl ApiRender {
    /// Send
    ///
    /// Message entry point. Renders the preset and answers with a data URI in
    /// `data`, or with `error`. Identical messages within the dedup window are
    /// dropped with 409.
    ///
    /// # Example Request
    /// ```json
    /// {
    ///   "command": "send",
    ///   "message": {
    ///     "preset": "echarts.0.Heating",
    ///     "width": 800,
    ///     "height": 300,
    ///     "theme": "dark"
    ///   }
    /// }
    /// ```
    #[oai(path = "/send", method = "post", tag = "ApiRenderTags::Render")]
    async fn send(&self, Json(json): Json<SendCommand>, state: Data<&Arc<AppState>>) -> SendResponse {
        match state.dispatcher.handle(&json).await {
            Dispatch::Reply(reply) => SendResponse::Ok(Json(reply)),
            Dispatch::Filtered => SendResponse::Filtered(Json(SendReply {
                data: None,
                error: Some("Duplicate message filtered".to_string()),
            })),
            Dispatch::Ignored => SendResponse::BadRequest(Json(BadRequestResponse::new(format!(
                "Unsupported command \"{}\" or missing message",
                json.command
            )))),
        }
    }

    /// Render
    ///
    /// Renders a preset in any supported format and returns the raw bytes, or
    /// a data URI when `returnBase64` is set.
    #[oai(path = "/render", method = "post", tag = "ApiRenderTags::Render")]
    async fn render(
        &self,
        Json(json): Json<RenderMessage>,
        state: Data<&Arc<AppState>>,
    ) -> RenderResponse {
        let return_base64 = json.return_base64.unwrap_or(false);

        let request = match RenderRequest::from_message(&json) {
            Ok(request) => request,
            Err(e) => return RenderResponse::BadRequest(Json(BadRequestResponse::new(e.to_string()))),
        };
        let format = request.format;

        let image = match state.dispatcher.pipeline().render(request).await {
            Ok(image) => image,
            Err(e) => return error_response(e),
        };

        if return_base64 {
            return RenderResponse::Base64(Json(Base64Response {
                data: image.data_uri(),
                mime_type: image.mime_type().to_string(),
            }));
        }

        match image.decode() {
            Ok(bytes) => RenderResponse::Binary(
                Attachment::new(bytes).filename(format!("chart.{}", format.as_str())),
            ),
            Err(e) => error_response(e),
        }
    }

    /// List Supported Formats
    #[oai(path = "/formats", method = "get", tag = "ApiRenderTags::Render")]
    async fn list_formats(&self) -> Json<Vec<FormatInfo>> {
        let formats = OutputFormat::ALL
            .iter()
            .map(|f| FormatInfo {
                name: f.as_str().to_string(),
                mime_type: f.mime_type().to_string(),
            })
            .collect();

        Json(formats)
    }

    #[oai(path = "/health", method = "get")]
    async fn health(&self, state: Data<&Arc<AppState>>) -> Json<HealthResponse> {
        let status = state.dispatcher.pipeline().status();

        Json(HealthResponse {
            status: "healthy".to_string(),
            render_slots: RenderSlots {
                available: status.available as u32,
                capacity: status.capacity as u32,
            },
        })
    }
}

fn error_response(err: RenderError) -> RenderResponse {
    match err {
        RenderError::SourceResolution(_) => {
            RenderResponse::NotFound(Json(BadRequestResponse::new(err.to_string())))
        }
        RenderError::DependencyUnavailable { .. } => {
            RenderResponse::ServiceUnavailable(Json(InternalServerErrorResponse::new(
                "route.render",
                "render",
                "Rendering unavailable",
                &err.to_string(),
            )))
        }
        _ => RenderResponse::InternalServerError(Json(InternalServerErrorResponse::new(
            "route.render",
            "render",
            "Rendering failed",
            &err.to_string(),
        ))),
    }
}
