//! Builder for [`Broker`](crate::Broker)

use std::path::PathBuf;

use ferrumq_codec::constants::{
    DEFAULT_CHANNEL_MAX, DEFAULT_FRAME_MAX, DEFAULT_HEARTBEAT, DEFAULT_PORT,
};

use crate::broker::Broker;

/// Resolved broker options
#[derive(Debug, Clone)]
pub(crate) struct Options {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            channel_max: DEFAULT_CHANNEL_MAX,
            frame_max: DEFAULT_FRAME_MAX,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// Builder for a [`Broker`]
///
/// ```rust
/// use ferrumq::Broker;
///
/// let broker = Broker::builder()
///     .host("127.0.0.1")
///     .port(0) // ephemeral
///     .data_dir("/tmp/ferrumq-data")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    options: Options,
}

impl Builder {
    /// Creates a builder with the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Interface to listen on; defaults to `localhost`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// TCP port; defaults to 5672, 0 picks an ephemeral port
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Directory for the message log and snapshots; defaults to `data`
    pub fn data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.options.data_dir = data_dir.into();
        self
    }

    /// Channel limit offered in `Connection.Tune`
    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.options.channel_max = channel_max;
        self
    }

    /// Frame size limit offered in `Connection.Tune`
    pub fn frame_max(mut self, frame_max: u32) -> Self {
        self.options.frame_max = frame_max;
        self
    }

    /// Heartbeat period in seconds offered in `Connection.Tune`; 0 disables
    pub fn heartbeat(mut self, heartbeat: u16) -> Self {
        self.options.heartbeat = heartbeat;
        self
    }

    /// Builds the broker; call [`Broker::start`] to bind and serve
    pub fn build(self) -> Broker {
        Broker::with_options(self.options)
    }
}
