//! Broker errors and the AMQP exception type method handlers raise

use std::io;

use ferrumq_codec::constants::reply_code;
use tokio::task::JoinError;

/// Error surfaced by the public broker API
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error binding, accepting, or persisting
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Wire codec error
    #[error(transparent)]
    Codec(#[from] ferrumq_codec::Error),

    /// A persisted snapshot or log record could not be parsed
    #[error("corrupt persisted state: {0}")]
    CorruptState(#[from] serde_json::Error),

    /// The broker is not running
    #[error("broker is not running")]
    NotRunning,

    /// `start` was called while the broker is already running
    #[error("broker is already running")]
    AlreadyRunning,

    /// The broker core task went away mid-request
    #[error("broker core task is gone")]
    CoreGone,

    /// Failure joining the core task on shutdown
    #[error(transparent)]
    Join(#[from] JoinError),
}

/// Which peer scope an AMQP exception closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExceptionScope {
    /// Close the offending channel, leave the connection up
    Channel,
    /// Tear down the whole connection
    Connection,
}

/// A protocol-level failure that becomes a `Channel.Close` or
/// `Connection.Close` toward the client
#[derive(Debug, Clone)]
pub(crate) struct AmqpException {
    pub code: u16,
    pub text: String,
    /// Class of the method being processed when the exception was raised
    pub class_id: u16,
    /// Method being processed when the exception was raised
    pub method_id: u16,
    pub scope: ExceptionScope,
}

impl AmqpException {
    fn channel_scoped(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            class_id: 0,
            method_id: 0,
            scope: ExceptionScope::Channel,
        }
    }

    fn connection_scoped(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            class_id: 0,
            method_id: 0,
            scope: ExceptionScope::Connection,
        }
    }

    /// Stamps the offending method onto the exception for the close frame
    pub(crate) fn with_method(mut self, class_id: u16, method_id: u16) -> Self {
        self.class_id = class_id;
        self.method_id = method_id;
        self
    }

    pub(crate) fn not_found(text: impl Into<String>) -> Self {
        Self::channel_scoped(reply_code::NOT_FOUND, text)
    }

    pub(crate) fn precondition_failed(text: impl Into<String>) -> Self {
        Self::channel_scoped(reply_code::PRECONDITION_FAILED, text)
    }

    pub(crate) fn access_refused(text: impl Into<String>) -> Self {
        Self::channel_scoped(reply_code::ACCESS_REFUSED, text)
    }

    pub(crate) fn resource_locked(text: impl Into<String>) -> Self {
        Self::channel_scoped(reply_code::RESOURCE_LOCKED, text)
    }

    pub(crate) fn channel_error(text: impl Into<String>) -> Self {
        // channel misuse is a connection-level failure in 0-9-1
        Self::connection_scoped(reply_code::CHANNEL_ERROR, text)
    }

    pub(crate) fn unexpected_frame(text: impl Into<String>) -> Self {
        Self::channel_scoped(reply_code::UNEXPECTED_FRAME, text)
    }

    pub(crate) fn command_invalid(text: impl Into<String>) -> Self {
        Self::connection_scoped(reply_code::COMMAND_INVALID, text)
    }

    pub(crate) fn internal_error(text: impl Into<String>) -> Self {
        Self::connection_scoped(reply_code::INTERNAL_ERROR, text)
    }
}

impl From<io::Error> for AmqpException {
    fn from(err: io::Error) -> Self {
        Self::internal_error(format!("io failure: {err}"))
    }
}

impl std::fmt::Display for AmqpException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}
