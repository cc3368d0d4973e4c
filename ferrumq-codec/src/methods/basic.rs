//! Basic-class methods (class id 60)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::field_table::FieldTable;
use crate::util::{get_short_str, get_u16, get_u32, get_u64, get_u8, put_short_str};

pub(crate) const QOS: u16 = 10;
pub(crate) const QOS_OK: u16 = 11;
pub(crate) const CONSUME: u16 = 20;
pub(crate) const CONSUME_OK: u16 = 21;
pub(crate) const CANCEL: u16 = 30;
pub(crate) const CANCEL_OK: u16 = 31;
pub(crate) const PUBLISH: u16 = 40;
pub(crate) const RETURN: u16 = 50;
pub(crate) const DELIVER: u16 = 60;
pub(crate) const GET: u16 = 70;
pub(crate) const GET_OK: u16 = 71;
pub(crate) const GET_EMPTY: u16 = 72;
pub(crate) const ACK: u16 = 80;
pub(crate) const REJECT: u16 = 90;
pub(crate) const RECOVER_ASYNC: u16 = 100;
pub(crate) const RECOVER: u16 = 110;
pub(crate) const RECOVER_OK: u16 = 111;
pub(crate) const NACK: u16 = 120;

/// Methods of the basic class
#[derive(Debug, Clone, PartialEq)]
pub enum BasicMethod {
    /// Set the channel prefetch window
    Qos(Qos),
    /// Qos confirmed
    QosOk,
    /// Start a consumer on a queue
    Consume(Consume),
    /// Consumer started
    ConsumeOk(ConsumeOk),
    /// Cancel a consumer
    Cancel(Cancel),
    /// Consumer cancelled
    CancelOk(CancelOk),
    /// Publish a message; a content header and body frames follow
    Publish(Publish),
    /// Return an unroutable mandatory message to its publisher
    Return(Return),
    /// Deliver a message to a consumer
    Deliver(Deliver),
    /// Synchronously fetch one message
    Get(Get),
    /// Fetched message follows as header and body frames
    GetOk(GetOk),
    /// The queue was empty
    GetEmpty(GetEmpty),
    /// Acknowledge one or more deliveries
    Ack(Ack),
    /// Reject a single delivery
    Reject(Reject),
    /// Requeue all unacked deliveries, without a reply
    RecoverAsync(Recover),
    /// Requeue all unacked deliveries
    Recover(Recover),
    /// Recover confirmed
    RecoverOk,
    /// Negatively acknowledge one or more deliveries
    Nack(Nack),
}

impl BasicMethod {
    pub(crate) fn method_id(&self) -> u16 {
        match self {
            BasicMethod::Qos(_) => QOS,
            BasicMethod::QosOk => QOS_OK,
            BasicMethod::Consume(_) => CONSUME,
            BasicMethod::ConsumeOk(_) => CONSUME_OK,
            BasicMethod::Cancel(_) => CANCEL,
            BasicMethod::CancelOk(_) => CANCEL_OK,
            BasicMethod::Publish(_) => PUBLISH,
            BasicMethod::Return(_) => RETURN,
            BasicMethod::Deliver(_) => DELIVER,
            BasicMethod::Get(_) => GET,
            BasicMethod::GetOk(_) => GET_OK,
            BasicMethod::GetEmpty(_) => GET_EMPTY,
            BasicMethod::Ack(_) => ACK,
            BasicMethod::Reject(_) => REJECT,
            BasicMethod::RecoverAsync(_) => RECOVER_ASYNC,
            BasicMethod::Recover(_) => RECOVER,
            BasicMethod::RecoverOk => RECOVER_OK,
            BasicMethod::Nack(_) => NACK,
        }
    }

    pub(crate) fn encode_args(&self, dst: &mut BytesMut) {
        match self {
            BasicMethod::Qos(m) => m.encode(dst),
            BasicMethod::QosOk => {}
            BasicMethod::Consume(m) => m.encode(dst),
            BasicMethod::ConsumeOk(m) => put_short_str(dst, &m.consumer_tag),
            BasicMethod::Cancel(m) => {
                put_short_str(dst, &m.consumer_tag);
                dst.put_u8(m.nowait as u8);
            }
            BasicMethod::CancelOk(m) => put_short_str(dst, &m.consumer_tag),
            BasicMethod::Publish(m) => m.encode(dst),
            BasicMethod::Return(m) => m.encode(dst),
            BasicMethod::Deliver(m) => m.encode(dst),
            BasicMethod::Get(m) => m.encode(dst),
            BasicMethod::GetOk(m) => m.encode(dst),
            BasicMethod::GetEmpty(m) => put_short_str(dst, &m.cluster_id),
            BasicMethod::Ack(m) => {
                dst.put_u64(m.delivery_tag);
                dst.put_u8(m.multiple as u8);
            }
            BasicMethod::Reject(m) => {
                dst.put_u64(m.delivery_tag);
                dst.put_u8(m.requeue as u8);
            }
            BasicMethod::RecoverAsync(m) | BasicMethod::Recover(m) => {
                dst.put_u8(m.requeue as u8);
            }
            BasicMethod::RecoverOk => {}
            BasicMethod::Nack(m) => {
                dst.put_u64(m.delivery_tag);
                let mut bits = 0u8;
                bits |= m.multiple as u8;
                bits |= (m.requeue as u8) << 1;
                dst.put_u8(bits);
            }
        }
    }

    pub(crate) fn decode_args(method_id: u16, src: &mut Bytes) -> Result<Self, Error> {
        let method = match method_id {
            QOS => BasicMethod::Qos(Qos::decode(src)?),
            QOS_OK => BasicMethod::QosOk,
            CONSUME => BasicMethod::Consume(Consume::decode(src)?),
            CONSUME_OK => BasicMethod::ConsumeOk(ConsumeOk {
                consumer_tag: get_short_str(src, "consumer-tag")?,
            }),
            CANCEL => BasicMethod::Cancel(Cancel {
                consumer_tag: get_short_str(src, "consumer-tag")?,
                nowait: get_u8(src, "nowait")? & 0b1 != 0,
            }),
            CANCEL_OK => BasicMethod::CancelOk(CancelOk {
                consumer_tag: get_short_str(src, "consumer-tag")?,
            }),
            PUBLISH => BasicMethod::Publish(Publish::decode(src)?),
            RETURN => BasicMethod::Return(Return::decode(src)?),
            DELIVER => BasicMethod::Deliver(Deliver::decode(src)?),
            GET => BasicMethod::Get(Get::decode(src)?),
            GET_OK => BasicMethod::GetOk(GetOk::decode(src)?),
            GET_EMPTY => BasicMethod::GetEmpty(GetEmpty {
                cluster_id: get_short_str(src, "cluster-id")?,
            }),
            ACK => BasicMethod::Ack(Ack {
                delivery_tag: get_u64(src, "delivery-tag")?,
                multiple: get_u8(src, "multiple")? & 0b1 != 0,
            }),
            REJECT => BasicMethod::Reject(Reject {
                delivery_tag: get_u64(src, "delivery-tag")?,
                requeue: get_u8(src, "requeue")? & 0b1 != 0,
            }),
            RECOVER_ASYNC => BasicMethod::RecoverAsync(Recover {
                requeue: get_u8(src, "requeue")? & 0b1 != 0,
            }),
            RECOVER => BasicMethod::Recover(Recover {
                requeue: get_u8(src, "requeue")? & 0b1 != 0,
            }),
            RECOVER_OK => BasicMethod::RecoverOk,
            NACK => {
                let delivery_tag = get_u64(src, "delivery-tag")?;
                let bits = get_u8(src, "nack flags")?;
                BasicMethod::Nack(Nack {
                    delivery_tag,
                    multiple: bits & 0b01 != 0,
                    requeue: bits & 0b10 != 0,
                })
            }
            other => {
                return Err(Error::UnknownMethod {
                    class_id: crate::constants::class_id::BASIC,
                    method_id: other,
                })
            }
        };
        Ok(method)
    }
}

/// Basic.Qos
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Qos {
    /// Prefetch window in bytes, 0 meaning unlimited
    pub prefetch_size: u32,
    /// Prefetch window in messages, 0 meaning unlimited
    pub prefetch_count: u16,
    /// Apply to the whole connection rather than the channel
    pub global: bool,
}

impl Qos {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.prefetch_size);
        dst.put_u16(self.prefetch_count);
        dst.put_u8(self.global as u8);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            prefetch_size: get_u32(src, "prefetch-size")?,
            prefetch_count: get_u16(src, "prefetch-count")?,
            global: get_u8(src, "global")? & 0b1 != 0,
        })
    }
}

/// Basic.Consume
#[derive(Debug, Clone, PartialEq)]
pub struct Consume {
    /// Queue to consume from
    pub queue: String,
    /// Consumer tag; empty asks the server to generate one
    pub consumer_tag: String,
    /// Do not deliver messages published on this connection
    pub no_local: bool,
    /// Deliveries need no acknowledgement
    pub no_ack: bool,
    /// Request sole access to the queue
    pub exclusive: bool,
    /// Suppress the reply frame
    pub nowait: bool,
    /// Consumer arguments
    pub arguments: FieldTable,
}

impl Consume {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        put_short_str(dst, &self.consumer_tag);
        let mut bits = 0u8;
        bits |= self.no_local as u8;
        bits |= (self.no_ack as u8) << 1;
        bits |= (self.exclusive as u8) << 2;
        bits |= (self.nowait as u8) << 3;
        dst.put_u8(bits);
        self.arguments.encode(dst);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        let queue = get_short_str(src, "queue")?;
        let consumer_tag = get_short_str(src, "consumer-tag")?;
        let bits = get_u8(src, "consume flags")?;
        Ok(Self {
            queue,
            consumer_tag,
            no_local: bits & 0b0001 != 0,
            no_ack: bits & 0b0010 != 0,
            exclusive: bits & 0b0100 != 0,
            nowait: bits & 0b1000 != 0,
            arguments: FieldTable::decode(src)?,
        })
    }
}

/// Basic.Consume-Ok
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOk {
    /// Tag identifying the consumer
    pub consumer_tag: String,
}

/// Basic.Cancel
#[derive(Debug, Clone, PartialEq)]
pub struct Cancel {
    /// Tag of the consumer to cancel
    pub consumer_tag: String,
    /// Suppress the reply frame
    pub nowait: bool,
}

/// Basic.Cancel-Ok
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOk {
    /// Tag of the cancelled consumer
    pub consumer_tag: String,
}

/// Basic.Publish
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    /// Target exchange; empty routes through the default exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Return the message if it cannot be routed
    pub mandatory: bool,
    /// Accepted on the wire; this broker does not enforce it
    pub immediate: bool,
}

impl Publish {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.routing_key);
        let mut bits = 0u8;
        bits |= self.mandatory as u8;
        bits |= (self.immediate as u8) << 1;
        dst.put_u8(bits);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        let exchange = get_short_str(src, "exchange")?;
        let routing_key = get_short_str(src, "routing-key")?;
        let bits = get_u8(src, "publish flags")?;
        Ok(Self {
            exchange,
            routing_key,
            mandatory: bits & 0b01 != 0,
            immediate: bits & 0b10 != 0,
        })
    }
}

/// Basic.Return
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    /// Reply code, 313 for an unroutable mandatory message
    pub reply_code: u16,
    /// Human-readable reason
    pub reply_text: String,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
}

impl Return {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.reply_code);
        put_short_str(dst, &self.reply_text);
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.routing_key);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            reply_code: get_u16(src, "reply-code")?,
            reply_text: get_short_str(src, "reply-text")?,
            exchange: get_short_str(src, "exchange")?,
            routing_key: get_short_str(src, "routing-key")?,
        })
    }
}

/// Basic.Deliver
#[derive(Debug, Clone, PartialEq)]
pub struct Deliver {
    /// Consumer receiving the message
    pub consumer_tag: String,
    /// Channel-scoped delivery tag
    pub delivery_tag: u64,
    /// The message was delivered before and requeued
    pub redelivered: bool,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
}

impl Deliver {
    fn encode(&self, dst: &mut BytesMut) {
        put_short_str(dst, &self.consumer_tag);
        dst.put_u64(self.delivery_tag);
        dst.put_u8(self.redelivered as u8);
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.routing_key);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            consumer_tag: get_short_str(src, "consumer-tag")?,
            delivery_tag: get_u64(src, "delivery-tag")?,
            redelivered: get_u8(src, "redelivered")? & 0b1 != 0,
            exchange: get_short_str(src, "exchange")?,
            routing_key: get_short_str(src, "routing-key")?,
        })
    }
}

/// Basic.Get
#[derive(Debug, Clone, PartialEq)]
pub struct Get {
    /// Queue to fetch from
    pub queue: String,
    /// The fetched message needs no acknowledgement
    pub no_ack: bool,
}

impl Get {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.queue);
        dst.put_u8(self.no_ack as u8);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        Ok(Self {
            queue: get_short_str(src, "queue")?,
            no_ack: get_u8(src, "no-ack")? & 0b1 != 0,
        })
    }
}

/// Basic.Get-Ok
#[derive(Debug, Clone, PartialEq)]
pub struct GetOk {
    /// Channel-scoped delivery tag
    pub delivery_tag: u64,
    /// The message was delivered before and requeued
    pub redelivered: bool,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Messages remaining in the queue
    pub message_count: u32,
}

impl GetOk {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64(self.delivery_tag);
        dst.put_u8(self.redelivered as u8);
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.routing_key);
        dst.put_u32(self.message_count);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            delivery_tag: get_u64(src, "delivery-tag")?,
            redelivered: get_u8(src, "redelivered")? & 0b1 != 0,
            exchange: get_short_str(src, "exchange")?,
            routing_key: get_short_str(src, "routing-key")?,
            message_count: get_u32(src, "message-count")?,
        })
    }
}

/// Basic.Get-Empty
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetEmpty {
    /// Reserved
    pub cluster_id: String,
}

/// Basic.Ack
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    /// Delivery to acknowledge, 0 with `multiple` meaning all outstanding
    pub delivery_tag: u64,
    /// Acknowledge every delivery up to and including the tag
    pub multiple: bool,
}

/// Basic.Reject
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reject {
    /// Delivery to reject
    pub delivery_tag: u64,
    /// Requeue instead of dropping
    pub requeue: bool,
}

/// Basic.Recover and Basic.Recover-Async
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recover {
    /// Head requeue when true, tail requeue when false
    pub requeue: bool,
}

/// Basic.Nack
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nack {
    /// Delivery to reject, 0 with `multiple` meaning all outstanding
    pub delivery_tag: u64,
    /// Reject every delivery up to and including the tag
    pub multiple: bool,
    /// Requeue instead of dropping
    pub requeue: bool,
}
