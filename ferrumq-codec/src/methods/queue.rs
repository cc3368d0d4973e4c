//! Queue-class methods (class id 50)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::field_table::FieldTable;
use crate::util::{get_short_str, get_u16, get_u32, get_u8, put_short_str};

pub(crate) const DECLARE: u16 = 10;
pub(crate) const DECLARE_OK: u16 = 11;
pub(crate) const BIND: u16 = 20;
pub(crate) const BIND_OK: u16 = 21;
pub(crate) const PURGE: u16 = 30;
pub(crate) const PURGE_OK: u16 = 31;
pub(crate) const DELETE: u16 = 40;
pub(crate) const DELETE_OK: u16 = 41;
pub(crate) const UNBIND: u16 = 50;
pub(crate) const UNBIND_OK: u16 = 51;

/// Methods of the queue class
#[derive(Debug, Clone, PartialEq)]
pub enum QueueMethod {
    /// Create a queue or assert an existing one
    Declare(Declare),
    /// Declare confirmed, carrying the (possibly generated) queue name
    DeclareOk(DeclareOk),
    /// Bind a queue to an exchange
    Bind(Bind),
    /// Bind confirmed
    BindOk,
    /// Drop all ready messages from a queue
    Purge(Purge),
    /// Purge confirmed with the number of messages dropped
    PurgeOk(PurgeOk),
    /// Delete a queue
    Delete(Delete),
    /// Delete confirmed with the number of messages dropped
    DeleteOk(DeleteOk),
    /// Remove a binding
    Unbind(Unbind),
    /// Unbind confirmed
    UnbindOk,
}

impl QueueMethod {
    pub(crate) fn method_id(&self) -> u16 {
        match self {
            QueueMethod::Declare(_) => DECLARE,
            QueueMethod::DeclareOk(_) => DECLARE_OK,
            QueueMethod::Bind(_) => BIND,
            QueueMethod::BindOk => BIND_OK,
            QueueMethod::Purge(_) => PURGE,
            QueueMethod::PurgeOk(_) => PURGE_OK,
            QueueMethod::Delete(_) => DELETE,
            QueueMethod::DeleteOk(_) => DELETE_OK,
            QueueMethod::Unbind(_) => UNBIND,
            QueueMethod::UnbindOk => UNBIND_OK,
        }
    }

    pub(crate) fn encode_args(&self, dst: &mut BytesMut) {
        match self {
            QueueMethod::Declare(m) => m.encode(dst),
            QueueMethod::DeclareOk(m) => m.encode(dst),
            QueueMethod::Bind(m) => m.encode(dst),
            QueueMethod::BindOk => {}
            QueueMethod::Purge(m) => m.encode(dst),
            QueueMethod::PurgeOk(m) => dst.put_u32(m.message_count),
            QueueMethod::Delete(m) => m.encode(dst),
            QueueMethod::DeleteOk(m) => dst.put_u32(m.message_count),
            QueueMethod::Unbind(m) => m.encode(dst),
            QueueMethod::UnbindOk => {}
        }
    }

    pub(crate) fn decode_args(method_id: u16, src: &mut Bytes) -> Result<Self, Error> {
        let method = match method_id {
            DECLARE => QueueMethod::Declare(Declare::decode(src)?),
            DECLARE_OK => QueueMethod::DeclareOk(DeclareOk::decode(src)?),
            BIND => QueueMethod::Bind(Bind::decode(src)?),
            BIND_OK => QueueMethod::BindOk,
            PURGE => QueueMethod::Purge(Purge::decode(src)?),
            PURGE_OK => QueueMethod::PurgeOk(PurgeOk {
                message_count: get_u32(src, "message-count")?,
            }),
            DELETE => QueueMethod::Delete(Delete::decode(src)?),
            DELETE_OK => QueueMethod::DeleteOk(DeleteOk {
                message_count: get_u32(src, "message-count")?,
            }),
            UNBIND => QueueMethod::Unbind(Unbind::decode(src)?),
            UNBIND_OK => QueueMethod::UnbindOk,
            other => {
                return Err(Error::UnknownMethod {
                    class_id: crate::constants::class_id::QUEUE,
                    method_id: other,
                })
            }
        };
        Ok(method)
    }
}

/// Queue.Declare
#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    /// Queue name; empty asks the server to generate one
    pub queue: String,
    /// Assert existence without creating
    pub passive: bool,
    /// Survive broker restart
    pub durable: bool,
    /// Restrict the queue to the declaring connection
    pub exclusive: bool,
    /// Delete once the consumer count returns to zero
    pub auto_delete: bool,
    /// Suppress the reply frame
    pub nowait: bool,
    /// Declaration arguments
    pub arguments: FieldTable,
}

impl Declare {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        let mut bits = 0u8;
        bits |= self.passive as u8;
        bits |= (self.durable as u8) << 1;
        bits |= (self.exclusive as u8) << 2;
        bits |= (self.auto_delete as u8) << 3;
        bits |= (self.nowait as u8) << 4;
        dst.put_u8(bits);
        self.arguments.encode(dst);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        let queue = get_short_str(src, "queue")?;
        let bits = get_u8(src, "declare flags")?;
        Ok(Self {
            queue,
            passive: bits & 0b0000_0001 != 0,
            durable: bits & 0b0000_0010 != 0,
            exclusive: bits & 0b0000_0100 != 0,
            auto_delete: bits & 0b0000_1000 != 0,
            nowait: bits & 0b0001_0000 != 0,
            arguments: FieldTable::decode(src)?,
        })
    }
}

/// Queue.Declare-Ok
#[derive(Debug, Clone, PartialEq)]
pub struct DeclareOk {
    /// Actual queue name
    pub queue: String,
    /// Ready messages in the queue
    pub message_count: u32,
    /// Active consumers on the queue
    pub consumer_count: u32,
}

impl DeclareOk {
    fn encode(&self, dst: &mut BytesMut) {
        put_short_str(dst, &self.queue);
        dst.put_u32(self.message_count);
        dst.put_u32(self.consumer_count);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            queue: get_short_str(src, "queue")?,
            message_count: get_u32(src, "message-count")?,
            consumer_count: get_u32(src, "consumer-count")?,
        })
    }
}

/// Queue.Bind
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    /// Destination queue
    pub queue: String,
    /// Source exchange
    pub exchange: String,
    /// Routing key or topic pattern
    pub routing_key: String,
    /// Suppress the reply frame
    pub nowait: bool,
    /// Binding arguments, consulted only by headers exchanges
    pub arguments: FieldTable,
}

impl Bind {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.routing_key);
        dst.put_u8(self.nowait as u8);
        self.arguments.encode(dst);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        Ok(Self {
            queue: get_short_str(src, "queue")?,
            exchange: get_short_str(src, "exchange")?,
            routing_key: get_short_str(src, "routing-key")?,
            nowait: get_u8(src, "nowait")? & 0b1 != 0,
            arguments: FieldTable::decode(src)?,
        })
    }
}

/// Queue.Purge
#[derive(Debug, Clone, PartialEq)]
pub struct Purge {
    /// Queue to purge
    pub queue: String,
    /// Suppress the reply frame
    pub nowait: bool,
}

impl Purge {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        dst.put_u8(self.nowait as u8);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        Ok(Self {
            queue: get_short_str(src, "queue")?,
            nowait: get_u8(src, "nowait")? & 0b1 != 0,
        })
    }
}

/// Queue.Purge-Ok
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurgeOk {
    /// Messages dropped by the purge
    pub message_count: u32,
}

/// Queue.Delete
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Queue to delete
    pub queue: String,
    /// Fail if consumers remain
    pub if_unused: bool,
    /// Fail if messages remain
    pub if_empty: bool,
    /// Suppress the reply frame
    pub nowait: bool,
}

impl Delete {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        let mut bits = 0u8;
        bits |= self.if_unused as u8;
        bits |= (self.if_empty as u8) << 1;
        bits |= (self.nowait as u8) << 2;
        dst.put_u8(bits);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        let queue = get_short_str(src, "queue")?;
        let bits = get_u8(src, "delete flags")?;
        Ok(Self {
            queue,
            if_unused: bits & 0b001 != 0,
            if_empty: bits & 0b010 != 0,
            nowait: bits & 0b100 != 0,
        })
    }
}

/// Queue.Delete-Ok
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeleteOk {
    /// Messages dropped with the queue
    pub message_count: u32,
}

/// Queue.Unbind
#[derive(Debug, Clone, PartialEq)]
pub struct Unbind {
    /// Bound queue
    pub queue: String,
    /// Bound exchange
    pub exchange: String,
    /// Routing key of the binding to remove
    pub routing_key: String,
    /// Binding arguments
    pub arguments: FieldTable,
}

impl Unbind {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.routing_key);
        self.arguments.encode(dst);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        Ok(Self {
            queue: get_short_str(src, "queue")?,
            exchange: get_short_str(src, "exchange")?,
            routing_key: get_short_str(src, "routing-key")?,
            arguments: FieldTable::decode(src)?,
        })
    }
}
