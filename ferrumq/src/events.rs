//! Broker event stream
//!
//! Every observable state change is published as a [`BrokerEvent`] on a
//! broadcast channel. Sends are fire-and-forget: a send to a channel with
//! no subscribers is discarded, and a subscriber that falls behind loses
//! the oldest events rather than slowing the broker.

use std::net::SocketAddr;

use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per subscriber before the oldest are dropped
pub(crate) const EVENT_CAPACITY: usize = 256;

/// An observable broker state change
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum BrokerEvent {
    /// The listener is bound and recovery is complete
    Started,
    /// The broker drained its connections and closed persistence
    Stopped,
    /// A broker-level failure outside any one connection
    Error {
        /// Human-readable failure description
        message: String,
    },
    /// A client finished the connection handshake
    ConnectionOpen {
        /// Connection id
        id: Uuid,
        /// Remote socket address
        peer_addr: SocketAddr,
    },
    /// A connection went away, orderly or not
    ConnectionClose {
        /// Connection id
        id: Uuid,
    },
    /// A connection failed with a protocol or IO error
    ConnectionError {
        /// Connection id
        id: Uuid,
        /// Human-readable failure description
        message: String,
    },
    /// A channel opened
    ChannelOpen {
        /// Owning connection
        connection: Uuid,
        /// Channel number
        channel: u16,
    },
    /// A channel closed
    ChannelClose {
        /// Owning connection
        connection: Uuid,
        /// Channel number
        channel: u16,
    },
    /// A channel's flow state changed
    ChannelFlow {
        /// Owning connection
        connection: Uuid,
        /// Channel number
        channel: u16,
        /// Whether deliveries are now flowing
        active: bool,
    },
    /// An exchange was declared into existence
    ExchangeCreated {
        /// Exchange name
        name: String,
    },
    /// An exchange was deleted
    ExchangeDeleted {
        /// Exchange name
        name: String,
    },
    /// A queue was declared into existence
    QueueCreated {
        /// Queue name
        name: String,
    },
    /// A queue was deleted
    QueueDeleted {
        /// Queue name
        name: String,
    },
    /// A queue was purged
    QueuePurged {
        /// Queue name
        name: String,
        /// Number of messages dropped
        messages: u32,
    },
    /// A binding was created
    BindingCreated {
        /// Source exchange
        source: String,
        /// Destination queue
        destination: String,
        /// Binding routing key
        routing_key: String,
    },
    /// A binding was removed
    BindingDeleted {
        /// Source exchange
        source: String,
        /// Destination queue
        destination: String,
        /// Binding routing key
        routing_key: String,
    },
    /// A consumer subscribed
    ConsumerCreated {
        /// Consumer tag
        tag: String,
        /// Queue consumed from
        queue: String,
    },
    /// A consumer was cancelled, by the client or the broker
    ConsumerCancelled {
        /// Consumer tag
        tag: String,
        /// Queue consumed from
        queue: String,
    },
    /// A publish completed frame assembly
    MessagePublished {
        /// Target exchange
        exchange: String,
        /// Routing key
        routing_key: String,
    },
    /// A publish was matched to destination queues
    MessageRouted {
        /// Target exchange
        exchange: String,
        /// Routing key
        routing_key: String,
        /// Number of queues the message was placed on
        queues: usize,
    },
    /// A message was handed to a consumer or a `Basic.Get`
    MessageDelivered {
        /// Source queue
        queue: String,
        /// Receiving consumer tag, empty for `Basic.Get`
        consumer_tag: String,
    },
    /// A delivery was acknowledged
    MessageAcked {
        /// Source queue
        queue: String,
    },
    /// A delivery was negatively acknowledged
    MessageNacked {
        /// Source queue
        queue: String,
    },
    /// A delivery was rejected
    MessageRejected {
        /// Source queue
        queue: String,
    },
    /// An unroutable mandatory publish was returned to its publisher
    MessageReturned {
        /// Target exchange
        exchange: String,
        /// Routing key
        routing_key: String,
    },
    /// Reserved for message expiry; this broker never emits it
    MessageExpired {
        /// Source queue
        queue: String,
    },
}

/// Fire-and-forget wrapper around the broadcast sender
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<BrokerEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: broadcast::Sender<BrokerEvent>) -> Self {
        Self { tx }
    }

    /// Publishes an event, discarding it if nobody is listening
    pub(crate) fn emit(&self, event: BrokerEvent) {
        let _ = self.tx.send(event);
    }
}
