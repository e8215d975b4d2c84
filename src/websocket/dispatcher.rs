use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::message::{EventContent, InboundEnvelope};

/// Receives the events the dispatcher recognises
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_user_created(&self, event: &EventContent);
}

/// Default handler: logs the event and leaves room for custom processing
#[derive(Debug, Default)]
pub struct LoggingUserCreatedHandler;

#[async_trait]
impl EventHandler for LoggingUserCreatedHandler {
    async fn on_user_created(&self, event: &EventContent) {
        tracing::info!(
            event_ts = %event.event_ts,
            payload = %event.payload,
            "A new user was created"
        );
    }
}

/// What happened to a dispatched frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `user.created` was delivered to the handler
    UserCreated,
    /// A `message` frame carrying some other event
    OtherEvent(Option<String>),
    /// Not a `message` frame
    Ignored,
}

/// Parses inbound text frames and routes recognised events to the handler
pub struct MessageDispatcher {
    handler: Arc<dyn EventHandler>,
}

impl MessageDispatcher {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }

    /// Dispatch one text frame. Malformed frames come back as
    /// `AppError::MalformedMessage` and have no other effect.
    pub async fn dispatch(&self, text: &str) -> Result<DispatchOutcome> {
        let envelope = InboundEnvelope::parse(text)?;

        if !envelope.is_message() {
            tracing::trace!(module = ?envelope.module, "Ignoring non-message frame");
            return Ok(DispatchOutcome::Ignored);
        }

        let content = envelope.event_content()?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(pretty) = serde_json::to_string_pretty(&content) {
                tracing::debug!(content = %pretty, "Received content");
            }
        }

        if content.is_user_created() {
            self.handler.on_user_created(&content).await;
            Ok(DispatchOutcome::UserCreated)
        } else {
            tracing::debug!(event = ?content.event, "Unhandled event");
            Ok(DispatchOutcome::OtherEvent(content.event))
        }
    }
}
