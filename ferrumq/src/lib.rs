//! An AMQP 0-9-1 message broker built on tokio
//!
//! FerrumQ accepts standard AMQP 0-9-1 clients over TCP, multiplexes their
//! channels, routes publishes through direct, fanout, and topic exchanges
//! to in-memory queues, and dispatches to consumers under prefetch and
//! flow-control rules. Durable exchanges, queues, bindings, and persistent
//! messages survive restart through an append-only message log plus JSON
//! snapshots.
//!
//! ```rust,no_run
//! use ferrumq::Broker;
//!
//! # async fn example() -> Result<(), ferrumq::Error> {
//! let mut broker = Broker::builder()
//!     .port(5672)
//!     .data_dir("/var/lib/ferrumq")
//!     .build();
//! broker.start().await?;
//! // ... serve until told otherwise ...
//! broker.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! All global state is owned by a single core task; connection engines and
//! the [`Broker`] handle talk to it over a command channel. The wire layer
//! lives in the `ferrumq-codec` crate.

#![deny(missing_docs, missing_debug_implementations)]

mod broker;
mod channel;
mod connection;
mod delivery;
mod dispatch;
mod entities;
mod error;
mod events;
mod persistence;
mod routing;

pub use broker::{
    BindingInfo, Broker, BrokerStatus, Builder, ConnectionInfo, ConsumerInfo, ExchangeInfo,
    QueueInfo,
};
pub use error::Error;
pub use events::BrokerEvent;
