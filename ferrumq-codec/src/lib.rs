//! Wire-level types and codecs for AMQP 0-9-1
//!
//! This crate implements the framing layer the `ferrumq` broker speaks:
//! the protocol header exchange, the frame encoder/decoder, typed field
//! tables, the basic-class property list, and every method class the broker
//! handles. It contains no broker logic; both the server and the test
//! clients drive it through `tokio_util::codec::Framed`.

#![deny(missing_docs, missing_debug_implementations)]

pub mod constants;
pub mod field_table;
pub mod frame;
pub mod methods;
pub mod properties;
pub mod protocol_header;

mod error;
mod util;

pub use error::Error;
pub use field_table::{Decimal, FieldTable, FieldValue};
pub use frame::{Frame, FrameCodec, FramePayload};
pub use methods::{
    BasicMethod, ChannelMethod, ConnectionMethod, ExchangeMethod, Method, QueueMethod,
};
pub use properties::{BasicProperties, ContentHeader, DELIVERY_MODE_PERSISTENT};
pub use protocol_header::{ProtocolHeader, ProtocolHeaderCodec};
