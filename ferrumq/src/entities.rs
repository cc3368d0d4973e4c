//! Entity records the broker routes between
//!
//! Exchanges, queues, bindings, consumers, and messages. The durable subset
//! derives serde for the snapshot files and the message log; runtime-only
//! state is skipped so recovery starts every entity cold.

use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ferrumq_codec::{BasicProperties, FieldTable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) type ConnectionId = Uuid;

/// Closed set of exchange types; routing dispatches by match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    /// Parses the type string carried by `Exchange.Declare`
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "fanout" => Some(Self::Fanout),
            "topic" => Some(Self::Topic),
            "headers" => Some(Self::Headers),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
            Self::Headers => "headers",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Exchange {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    #[serde(default)]
    pub is_default: bool,
}

impl Exchange {
    /// The built-in exchanges present after every recovery: the empty-name
    /// direct exchange plus one of each type under the reserved prefix.
    pub(crate) fn defaults() -> Vec<Exchange> {
        let default = |name: &str, kind| Exchange {
            name: name.to_string(),
            kind,
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: FieldTable::new(),
            is_default: true,
        };
        vec![
            default("", ExchangeKind::Direct),
            default("amq.direct", ExchangeKind::Direct),
            default("amq.fanout", ExchangeKind::Fanout),
            default("amq.topic", ExchangeKind::Topic),
            default("amq.headers", ExchangeKind::Headers),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Queue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    /// Owning connection, set iff `exclusive`
    #[serde(skip)]
    pub exclusive_owner: Option<ConnectionId>,
    #[serde(skip)]
    pub messages: VecDeque<Message>,
    /// Consumer tags in subscription order; delivery rotates through them
    #[serde(skip)]
    pub consumer_tags: Vec<String>,
    #[serde(skip)]
    pub next_consumer: usize,
    /// Set once any consumer subscribed; auto-delete fires when the count
    /// later returns to zero
    #[serde(skip)]
    pub had_consumers: bool,
}

impl Queue {
    pub(crate) fn message_count(&self) -> u32 {
        self.messages.len() as u32
    }

    pub(crate) fn consumer_count(&self) -> u32 {
        self.consumer_tags.len() as u32
    }

    /// Whether an auto-delete queue has outlived its consumers
    pub(crate) fn ready_for_auto_delete(&self) -> bool {
        self.auto_delete && self.had_consumers && self.consumer_tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Binding {
    /// Source exchange name
    pub source: String,
    /// Destination queue name
    pub destination: String,
    pub routing_key: String,
    #[serde(default)]
    pub arguments: FieldTable,
}

impl Binding {
    /// Bindings are identified by source, destination, and routing key;
    /// arguments are carried but not part of the identity
    pub(crate) fn same_identity(&self, source: &str, destination: &str, routing_key: &str) -> bool {
        self.source == source && self.destination == destination && self.routing_key == routing_key
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Consumer {
    pub tag: String,
    pub queue: String,
    pub connection: ConnectionId,
    pub channel: u16,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    #[allow(dead_code)]
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Message {
    /// Stable id, taken from `properties.message_id` when present
    pub id: String,
    pub exchange: String,
    pub routing_key: String,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub properties: BasicProperties,
    #[serde(with = "content_encoding")]
    pub content: Bytes,
    /// Server-side receive time
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub redelivered: bool,
    /// Connection the publish arrived on; `no_local` consumers on the same
    /// connection are skipped. Lost across restart by design.
    #[serde(skip)]
    pub origin: Option<ConnectionId>,
}

impl Message {
    pub(crate) fn is_persistent(&self) -> bool {
        self.properties.is_persistent()
    }
}

/// One delivered-but-unacknowledged message on a channel
#[derive(Debug, Clone)]
pub(crate) struct UnackedEntry {
    pub delivery_tag: u64,
    pub message: Message,
    /// Queue the message was delivered from; requeues return it there
    pub queue: String,
    /// Empty for `Basic.Get` deliveries
    pub consumer_tag: String,
    #[allow(dead_code)]
    pub delivered_at: DateTime<Utc>,
}

pub(crate) fn generated_queue_name() -> String {
    format!("amq.gen-{}", Uuid::new_v4())
}

pub(crate) fn generated_consumer_tag(connection: ConnectionId, channel: u16, seq: u64) -> String {
    format!("amq.ctag-{connection}-{channel}-{seq}")
}

/// Serializes message content as a base64 string inside the log envelope
mod content_encoding {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(content: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(content))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD
            .decode(raw)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_envelope_roundtrips_through_json() {
        let msg = Message {
            id: "m-1".into(),
            exchange: "logs".into(),
            routing_key: "info".into(),
            mandatory: true,
            immediate: false,
            properties: BasicProperties {
                delivery_mode: Some(2),
                content_type: Some("text/plain".into()),
                ..Default::default()
            },
            content: Bytes::from_static(b"\x00\x01binary\xff"),
            timestamp: Utc::now(),
            redelivered: true,
            origin: None,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.exchange, msg.exchange);
        assert_eq!(back.routing_key, msg.routing_key);
        assert_eq!(back.mandatory, msg.mandatory);
        assert_eq!(back.properties, msg.properties);
        assert_eq!(back.content, msg.content);
        assert_eq!(back.timestamp, msg.timestamp);
        // runtime-only flag is not part of the envelope
        assert!(!back.redelivered);
    }

    #[test]
    fn exchange_kind_parses_the_wire_names() {
        assert_eq!(ExchangeKind::parse("topic"), Some(ExchangeKind::Topic));
        assert_eq!(ExchangeKind::parse("x-custom"), None);
        assert_eq!(ExchangeKind::Fanout.as_str(), "fanout");
    }

    #[test]
    fn generated_names_carry_the_reserved_prefix() {
        assert!(generated_queue_name().starts_with("amq.gen-"));
        let tag = generated_consumer_tag(Uuid::new_v4(), 7, 3);
        assert!(tag.starts_with("amq.ctag-"));
        assert!(tag.ends_with("-7-3"));
    }
}
