//! Content header frames and the basic-class property list
//!
//! The property list is encoded as a u16 flag bitmap followed by only the
//! properties whose bits are set, in fixed order from bit 15 down to bit 2.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::field_table::FieldTable;
use crate::util::{get_short_str, get_u16, get_u64, get_u8, put_short_str};

const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_CLUSTER_ID: u16 = 1 << 2;

/// Delivery mode marking a message persistent
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// The basic-class message properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicProperties {
    /// MIME content type
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_type: Option<String>,
    /// MIME content encoding
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_encoding: Option<String>,
    /// Application headers
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headers: Option<FieldTable>,
    /// 1 transient, 2 persistent
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delivery_mode: Option<u8>,
    /// Priority 0..9
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub priority: Option<u8>,
    /// Application correlation identifier
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
    /// Address to reply to
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reply_to: Option<String>,
    /// Message expiration
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration: Option<String>,
    /// Application message identifier
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<String>,
    /// Message timestamp, seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<u64>,
    /// Message type name (`type` on the wire)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
    /// Creating user id
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    /// Creating application id
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub app_id: Option<String>,
    /// Reserved, used by no current broker
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cluster_id: Option<String>,
}

impl BasicProperties {
    /// Whether `delivery_mode` marks the message persistent
    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == Some(DELIVERY_MODE_PERSISTENT)
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        let mut set = |present: bool, bit: u16| {
            if present {
                flags |= bit;
            }
        };
        set(self.content_type.is_some(), FLAG_CONTENT_TYPE);
        set(self.content_encoding.is_some(), FLAG_CONTENT_ENCODING);
        set(self.headers.is_some(), FLAG_HEADERS);
        set(self.delivery_mode.is_some(), FLAG_DELIVERY_MODE);
        set(self.priority.is_some(), FLAG_PRIORITY);
        set(self.correlation_id.is_some(), FLAG_CORRELATION_ID);
        set(self.reply_to.is_some(), FLAG_REPLY_TO);
        set(self.expiration.is_some(), FLAG_EXPIRATION);
        set(self.message_id.is_some(), FLAG_MESSAGE_ID);
        set(self.timestamp.is_some(), FLAG_TIMESTAMP);
        set(self.kind.is_some(), FLAG_TYPE);
        set(self.user_id.is_some(), FLAG_USER_ID);
        set(self.app_id.is_some(), FLAG_APP_ID);
        set(self.cluster_id.is_some(), FLAG_CLUSTER_ID);
        flags
    }

    /// Encodes the flag bitmap and the present properties
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.flags());
        if let Some(v) = &self.content_type {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.content_encoding {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.headers {
            v.encode(dst);
        }
        if let Some(v) = self.delivery_mode {
            dst.put_u8(v);
        }
        if let Some(v) = self.priority {
            dst.put_u8(v);
        }
        if let Some(v) = &self.correlation_id {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.reply_to {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.expiration {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.message_id {
            put_short_str(dst, v);
        }
        if let Some(v) = self.timestamp {
            dst.put_u64(v);
        }
        if let Some(v) = &self.kind {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.user_id {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.app_id {
            put_short_str(dst, v);
        }
        if let Some(v) = &self.cluster_id {
            put_short_str(dst, v);
        }
    }

    /// Decodes the flag bitmap and the properties it declares present
    pub fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let flags = get_u16(src, "property flags")?;
        let mut props = Self::default();
        if flags & FLAG_CONTENT_TYPE != 0 {
            props.content_type = Some(get_short_str(src, "content-type")?);
        }
        if flags & FLAG_CONTENT_ENCODING != 0 {
            props.content_encoding = Some(get_short_str(src, "content-encoding")?);
        }
        if flags & FLAG_HEADERS != 0 {
            props.headers = Some(FieldTable::decode(src)?);
        }
        if flags & FLAG_DELIVERY_MODE != 0 {
            props.delivery_mode = Some(get_u8(src, "delivery-mode")?);
        }
        if flags & FLAG_PRIORITY != 0 {
            props.priority = Some(get_u8(src, "priority")?);
        }
        if flags & FLAG_CORRELATION_ID != 0 {
            props.correlation_id = Some(get_short_str(src, "correlation-id")?);
        }
        if flags & FLAG_REPLY_TO != 0 {
            props.reply_to = Some(get_short_str(src, "reply-to")?);
        }
        if flags & FLAG_EXPIRATION != 0 {
            props.expiration = Some(get_short_str(src, "expiration")?);
        }
        if flags & FLAG_MESSAGE_ID != 0 {
            props.message_id = Some(get_short_str(src, "message-id")?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            props.timestamp = Some(get_u64(src, "timestamp")?);
        }
        if flags & FLAG_TYPE != 0 {
            props.kind = Some(get_short_str(src, "type")?);
        }
        if flags & FLAG_USER_ID != 0 {
            props.user_id = Some(get_short_str(src, "user-id")?);
        }
        if flags & FLAG_APP_ID != 0 {
            props.app_id = Some(get_short_str(src, "app-id")?);
        }
        if flags & FLAG_CLUSTER_ID != 0 {
            props.cluster_id = Some(get_short_str(src, "cluster-id")?);
        }
        Ok(props)
    }
}

/// Payload of a content header frame
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    /// Class of the content-bearing method, 60 for basic
    pub class_id: u16,
    /// Total size of the body that follows, possibly zero
    pub body_size: u64,
    /// Message properties
    pub properties: BasicProperties,
}

impl ContentHeader {
    /// Creates a basic-class content header
    pub fn basic(body_size: u64, properties: BasicProperties) -> Self {
        Self {
            class_id: crate::constants::class_id::BASIC,
            body_size,
            properties,
        }
    }

    /// Encodes class id, zero weight, body size, and properties
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.class_id);
        dst.put_u16(0); // weight
        dst.put_u64(self.body_size);
        self.properties.encode(dst);
    }

    /// Decodes a content header payload, ignoring the weight field
    pub fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let class_id = get_u16(src, "header class id")?;
        let _weight = get_u16(src, "header weight")?;
        let body_size = get_u64(src, "body size")?;
        let properties = BasicProperties::decode(src)?;
        Ok(Self {
            class_id,
            body_size,
            properties,
        })
    }
}
