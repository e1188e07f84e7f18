pub mod provider;
pub mod scripted;

pub use provider::{
    ChatTransport, NotificationStream, TransportError, TransportRequest, TransportResult,
    TransportStreamHandle, TransportWorker,
};
pub use scripted::{DEFAULT_STEP_DELAY, ScriptedReply, ScriptedTransport};
