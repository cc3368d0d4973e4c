//! Implements errors associated with encoding and decoding

use std::io;

/// Error encoding or decoding wire data
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The peer sent something that is not an AMQP 0-9-1 protocol header
    #[error("unsupported protocol header {0:02x?}")]
    ProtocolHeaderMismatch([u8; 8]),

    /// The frame end marker is not 0xCE
    #[error("frame end marker is not 0xCE")]
    FrameEnd,

    /// The declared frame size exceeds the negotiated maximum
    #[error("frame of {size} bytes exceeds the {max} byte maximum")]
    FrameTooLarge {
        /// Total on-wire size of the offending frame
        size: usize,
        /// Negotiated maximum frame size
        max: usize,
    },

    /// The frame type byte is not one of method/header/body/heartbeat
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// Malformed method arguments, field table, or content header
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A `(class_id, method_id)` pair this codec does not know
    #[error("unknown method {class_id}.{method_id}")]
    UnknownMethod {
        /// Class id of the unknown method
        class_id: u16,
        /// Method id of the unknown method
        method_id: u16,
    },
}

impl Error {
    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }
}
