use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::dedup::DedupFilter;
use crate::core::encode::OutputFormat;
use crate::core::pipeline::{RenderPipeline, RenderRequest};
use crate::error::{RenderError, USAGE_HINT};
use crate::schemas::render::{RenderMessage, SendCommand, SendReply};

pub const SEND_COMMAND: &str = "send";

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Answer for the caller's callback
    Reply(SendReply),
    /// Duplicate inside the dedup window; nothing rendered
    Filtered,
    /// Not a `send` command or no message attached
    Ignored,
}

impl Dispatch {
    fn data(data: String) -> Self {
        Dispatch::Reply(SendReply {
            data: Some(data),
            error: None,
        })
    }

    fn error(error: impl Into<String>) -> Self {
        Dispatch::Reply(SendReply {
            data: None,
            error: Some(error.into()),
        })
    }
}

pub struct MessageDispatcher {
    pipeline: Arc<RenderPipeline>,
    dedup: DedupFilter,
    allow_binary: bool,
}

impl MessageDispatcher {
    pub fn new(pipeline: Arc<RenderPipeline>, dedup_window: Duration, allow_binary: bool) -> Self {
        Self {
            pipeline,
            dedup: DedupFilter::new(dedup_window),
            allow_binary,
        }
    }

    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    pub async fn handle(&self, command: &SendCommand) -> Dispatch {
        if command.command != SEND_COMMAND {
            return Dispatch::Ignored;
        }
        let Some(payload) = command.message.as_ref().filter(|m| !m.is_null()) else {
            return Dispatch::Ignored;
        };

        // compared as sent, unknown fields included
        if !self.dedup.admit(&payload.to_string()) {
            return Dispatch::Filtered;
        }

        let message = match RenderMessage::deserialize(payload) {
            Ok(message) => message,
            Err(e) if payload.is_object() => {
                tracing::warn!("Malformed render message: {}", e);
                return Dispatch::error(format!("Invalid message: {e}"));
            }
            Err(_) => RenderMessage::default(),
        };

        if message.preset.as_deref().is_none_or(|p| p.trim().is_empty()) {
            tracing::error!("{}", USAGE_HINT);
            return Dispatch::error(USAGE_HINT);
        }

        let renderer = message.renderer.as_deref().unwrap_or("");
        if !self.allow_binary && !renderer.is_empty() && renderer != OutputFormat::Svg.as_str() {
            tracing::warn!("Rejecting renderer {} on the message path", renderer);
            return Dispatch::error(RenderError::UnsupportedRenderer(renderer.to_string()).to_string());
        }

        let request = match RenderRequest::from_message(&message) {
            Ok(request) => request,
            Err(e) => return Dispatch::error(e.to_string()),
        };

        match self.pipeline.render(request).await {
            Ok(image) => Dispatch::data(image.data_uri()),
            Err(e) => Dispatch::error(e.to_string()),
        }
    }
}
