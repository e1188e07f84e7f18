use agentchat_storage::StorageError;
use snafu::Snafu;

use crate::transport::TransportError;

/// Recoverable failures observed by the chat core. None of them is fatal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("transport failed for stream generation {generation} on `{stage}`: {message}"))]
    Transport {
        stage: &'static str,
        generation: u64,
        message: String,
    },
    #[snafu(display("failed to hydrate session '{session_id}' on `{stage}`: {source}"))]
    Hydration {
        stage: &'static str,
        session_id: String,
        source: StorageError,
    },
    #[snafu(display("dropped malformed stream notification on `{stage}`: {details}"))]
    MalformedDelta {
        stage: &'static str,
        details: String,
    },
    #[snafu(display(
        "discarded stale result on `{stage}`: expected generation {expected}, got {actual}"
    ))]
    StaleResult {
        stage: &'static str,
        expected: u64,
        actual: u64,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmitRejected {
    #[snafu(display("refusing to submit blank input"))]
    BlankInput { stage: &'static str },
    #[snafu(display("a response is already streaming"))]
    StreamActive { stage: &'static str },
    #[snafu(display("session '{session_id}' is still loading its history"))]
    Hydrating {
        stage: &'static str,
        session_id: String,
    },
    #[snafu(display("transport refused the request on `{stage}`: {source}"))]
    TransportUnavailable {
        stage: &'static str,
        source: TransportError,
    },
}
