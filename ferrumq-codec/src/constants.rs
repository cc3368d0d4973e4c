//! Protocol constants shared by the codec and the broker

/// Default TCP port for AMQP 0-9-1
pub const DEFAULT_PORT: u16 = 5672;

/// Default upper bound on channels per connection offered in `Connection.Tune`
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;

/// Default upper bound on frame size offered in `Connection.Tune`
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// Default heartbeat period in seconds offered in `Connection.Tune`
pub const DEFAULT_HEARTBEAT: u16 = 60;

/// Type byte of a method frame
pub const FRAME_METHOD: u8 = 1;

/// Type byte of a content header frame
pub const FRAME_HEADER: u8 = 2;

/// Type byte of a content body frame
pub const FRAME_BODY: u8 = 3;

/// Type byte of a heartbeat frame
pub const FRAME_HEARTBEAT: u8 = 8;

/// Every frame is terminated by this marker byte
pub const FRAME_END: u8 = 0xCE;

/// Bytes a frame occupies on the wire beyond its payload:
/// type (1) + channel (2) + size (4) + end marker (1)
pub const FRAME_OVERHEAD: usize = 8;

/// AMQP class ids
pub mod class_id {
    /// Connection class
    pub const CONNECTION: u16 = 10;
    /// Channel class
    pub const CHANNEL: u16 = 20;
    /// Exchange class
    pub const EXCHANGE: u16 = 40;
    /// Queue class
    pub const QUEUE: u16 = 50;
    /// Basic class
    pub const BASIC: u16 = 60;
}

/// AMQP reply codes carried in `Close` and `Basic.Return` methods
pub mod reply_code {
    /// Operation completed
    pub const SUCCESS: u16 = 200;
    /// Message body exceeded a limit
    pub const CONTENT_TOO_LARGE: u16 = 311;
    /// Mandatory message could not be routed
    pub const NO_CONSUMERS: u16 = 313;
    /// Server closed the connection administratively
    pub const CONNECTION_FORCED: u16 = 320;
    /// Virtual host path was malformed
    pub const INVALID_PATH: u16 = 402;
    /// Operation refused for rights reasons
    pub const ACCESS_REFUSED: u16 = 403;
    /// Referenced exchange or queue does not exist
    pub const NOT_FOUND: u16 = 404;
    /// Exclusive resource owned by another connection
    pub const RESOURCE_LOCKED: u16 = 405;
    /// Operation guard not satisfied
    pub const PRECONDITION_FAILED: u16 = 406;
    /// Malformed frame
    pub const FRAME_ERROR: u16 = 501;
    /// Malformed method arguments or field table
    pub const SYNTAX_ERROR: u16 = 502;
    /// Method invalid for the current state
    pub const COMMAND_INVALID: u16 = 503;
    /// Channel used incorrectly
    pub const CHANNEL_ERROR: u16 = 504;
    /// Frame type not expected at this point
    pub const UNEXPECTED_FRAME: u16 = 505;
    /// Method known but not supported
    pub const NOT_IMPLEMENTED: u16 = 540;
    /// Server failure unrelated to the client
    pub const INTERNAL_ERROR: u16 = 541;
}
