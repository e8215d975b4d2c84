mod dispatcher;
mod message;

pub use dispatcher::{DispatchOutcome, EventHandler, LoggingUserCreatedHandler, MessageDispatcher};
pub use message::{
    EventContent, InboundEnvelope, OutboundMessage, MESSAGE_MODULE, USER_CREATED_EVENT,
};
