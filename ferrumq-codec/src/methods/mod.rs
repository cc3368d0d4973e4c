//! Method frame payloads, one module per class
//!
//! A method payload is a u16 class id, a u16 method id, and the
//! method-specific arguments. [`Method`] is the closed union over every
//! method this broker speaks; decoding an id outside it fails with
//! [`Error::UnknownMethod`].

pub mod basic;
pub mod channel;
pub mod connection;
pub mod exchange;
pub mod queue;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::class_id;
use crate::error::Error;
use crate::util::get_u16;

pub use basic::BasicMethod;
pub use channel::ChannelMethod;
pub use connection::ConnectionMethod;
pub use exchange::ExchangeMethod;
pub use queue::QueueMethod;

/// A decoded method frame payload
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// Connection class, channel 0 only
    Connection(ConnectionMethod),
    /// Channel class
    Channel(ChannelMethod),
    /// Exchange class
    Exchange(ExchangeMethod),
    /// Queue class
    Queue(QueueMethod),
    /// Basic class
    Basic(BasicMethod),
}

impl Method {
    /// Class id of the method
    pub fn class_id(&self) -> u16 {
        match self {
            Method::Connection(_) => class_id::CONNECTION,
            Method::Channel(_) => class_id::CHANNEL,
            Method::Exchange(_) => class_id::EXCHANGE,
            Method::Queue(_) => class_id::QUEUE,
            Method::Basic(_) => class_id::BASIC,
        }
    }

    /// Method id within the class
    pub fn method_id(&self) -> u16 {
        match self {
            Method::Connection(m) => m.method_id(),
            Method::Channel(m) => m.method_id(),
            Method::Exchange(m) => m.method_id(),
            Method::Queue(m) => m.method_id(),
            Method::Basic(m) => m.method_id(),
        }
    }

    /// Encodes class id, method id, and arguments
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.class_id());
        dst.put_u16(self.method_id());
        match self {
            Method::Connection(m) => m.encode_args(dst),
            Method::Channel(m) => m.encode_args(dst),
            Method::Exchange(m) => m.encode_args(dst),
            Method::Queue(m) => m.encode_args(dst),
            Method::Basic(m) => m.encode_args(dst),
        }
    }

    /// Decodes a whole method payload
    pub fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let class_id = get_u16(src, "class id")?;
        let method_id = get_u16(src, "method id")?;
        let method = match class_id {
            class_id::CONNECTION => {
                Method::Connection(ConnectionMethod::decode_args(method_id, src)?)
            }
            class_id::CHANNEL => Method::Channel(ChannelMethod::decode_args(method_id, src)?),
            class_id::EXCHANGE => Method::Exchange(ExchangeMethod::decode_args(method_id, src)?),
            class_id::QUEUE => Method::Queue(QueueMethod::decode_args(method_id, src)?),
            class_id::BASIC => Method::Basic(BasicMethod::decode_args(method_id, src)?),
            other => {
                return Err(Error::UnknownMethod {
                    class_id: other,
                    method_id,
                })
            }
        };
        Ok(method)
    }
}

// Convenience conversions so call sites can write `method.into()`
impl From<ConnectionMethod> for Method {
    fn from(m: ConnectionMethod) -> Self {
        Method::Connection(m)
    }
}

impl From<ChannelMethod> for Method {
    fn from(m: ChannelMethod) -> Self {
        Method::Channel(m)
    }
}

impl From<ExchangeMethod> for Method {
    fn from(m: ExchangeMethod) -> Self {
        Method::Exchange(m)
    }
}

impl From<QueueMethod> for Method {
    fn from(m: QueueMethod) -> Self {
        Method::Queue(m)
    }
}

impl From<BasicMethod> for Method {
    fn from(m: BasicMethod) -> Self {
        Method::Basic(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_table::{FieldTable, FieldValue};

    fn roundtrip(method: Method) -> Method {
        let mut buf = BytesMut::new();
        method.encode(&mut buf);
        let mut src = buf.freeze();
        let decoded = Method::decode(&mut src).unwrap();
        assert!(src.is_empty(), "trailing bytes after method args");
        decoded
    }

    #[test]
    fn queue_declare_bit_packing() {
        let method = Method::Queue(QueueMethod::Declare(queue::Declare {
            queue: "jobs".into(),
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: true,
            nowait: false,
            arguments: FieldTable::new(),
        }));
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn basic_consume_flags_roundtrip() {
        let mut args = FieldTable::new();
        args.insert("x-priority", FieldValue::I32(3));
        let method = Method::Basic(BasicMethod::Consume(basic::Consume {
            queue: "jobs".into(),
            consumer_tag: String::new(),
            no_local: true,
            no_ack: false,
            exclusive: true,
            nowait: false,
            arguments: args,
        }));
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn basic_nack_packs_multiple_and_requeue() {
        let method = Method::Basic(BasicMethod::Nack(basic::Nack {
            delivery_tag: u64::MAX,
            multiple: true,
            requeue: true,
        }));
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn connection_start_ok_keeps_raw_response() {
        let method = Method::Connection(ConnectionMethod::StartOk(connection::StartOk {
            client_properties: FieldTable::new(),
            mechanism: "PLAIN".into(),
            response: Bytes::from_static(b"\0guest\0guest"),
            locale: "en_US".into(),
        }));
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(90); // tx class, unsupported
        buf.put_u16(10);
        let mut src = buf.freeze();
        assert!(matches!(
            Method::decode(&mut src),
            Err(Error::UnknownMethod { class_id: 90, .. })
        ));
    }
}
