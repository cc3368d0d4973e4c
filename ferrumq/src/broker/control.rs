//! Commands flowing into the broker core task
//!
//! Connection engines and the public handle both talk to the core over one
//! bounded mpsc channel; queries carry a oneshot for the reply.

use std::net::SocketAddr;

use ferrumq_codec::{FieldTable, Frame};
use tokio::sync::{mpsc, oneshot};

use crate::broker::{
    BindingInfo, BrokerStatus, ConnectionInfo, ConsumerInfo, ExchangeInfo, QueueInfo,
};
use crate::connection::TuneParams;
use crate::entities::ConnectionId;

/// Commands processed serially by the core
#[derive(Debug)]
pub(crate) enum BrokerControl {
    /// A connection finished its handshake
    Register(Box<NewConnection>),
    /// A post-handshake frame arrived on a connection
    Inbound {
        connection: ConnectionId,
        frame: Frame,
    },
    /// A connection's socket went away, orderly or not
    Disconnected {
        connection: ConnectionId,
        error: Option<String>,
    },
    /// Read-only enumeration for the public handle
    Query(Query),
    /// Stop the core: force-close connections, flush persistence
    Shutdown { done: oneshot::Sender<()> },
}

/// A freshly negotiated connection announcing itself to the core
#[derive(Debug)]
pub(crate) struct NewConnection {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    /// Frames the core wants written to this connection's socket
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub tune: TuneParams,
    pub client_properties: FieldTable,
    pub virtual_host: String,
    pub username: String,
}

/// Read-only queries answered from the core's tables
#[derive(Debug)]
pub(crate) enum Query {
    Status(oneshot::Sender<BrokerStatus>),
    Connections(oneshot::Sender<Vec<ConnectionInfo>>),
    Exchanges(oneshot::Sender<Vec<ExchangeInfo>>),
    Queues(oneshot::Sender<Vec<QueueInfo>>),
    Bindings(oneshot::Sender<Vec<BindingInfo>>),
    Consumers(oneshot::Sender<Vec<ConsumerInfo>>),
}
