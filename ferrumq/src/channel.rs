//! Per-channel state: lifecycle, QoS, unacked tracking, content assembly

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use ferrumq_codec::ContentHeader;

use crate::entities::UnackedEntry;
use crate::error::AmqpException;

/// Channel lifecycle; `Opening` exists only between the open request and
/// its reply inside a single dispatch step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    #[allow(dead_code)]
    Opening,
    Open,
    /// Server sent `Channel.Close` and is waiting for the client's Close-Ok
    Closing,
    #[allow(dead_code)]
    Closed,
}

/// Prefetch window set by `Basic.Qos`
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Qos {
    #[allow(dead_code)]
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    /// Kept for enumeration; this broker applies the window per channel
    #[allow(dead_code)]
    pub global: bool,
}

/// The publish parameters held while header and body frames arrive
#[derive(Debug, Clone)]
pub(crate) struct PendingPublish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

/// Content assembly state machine
///
/// `Basic.Publish` moves Idle to AwaitingHeader; the content header moves
/// on to AwaitingBody (or completes a zero-size body outright); body frames
/// accumulate until the announced size is reached. Any frame out of this
/// order is a 505 channel exception.
#[derive(Debug, Default)]
pub(crate) enum ContentAssembly {
    #[default]
    Idle,
    AwaitingHeader(PendingPublish),
    AwaitingBody {
        publish: PendingPublish,
        header: ContentHeader,
        buf: BytesMut,
    },
}

/// A fully assembled publish, ready for routing
#[derive(Debug)]
pub(crate) struct CompletedPublish {
    pub publish: PendingPublish,
    pub header: ContentHeader,
    pub content: Bytes,
}

#[derive(Debug)]
pub(crate) struct Channel {
    pub number: u16,
    pub state: ChannelState,
    pub flow_active: bool,
    pub qos: Qos,
    delivery_tag: u64,
    /// Unacked deliveries keyed by tag; BTreeMap so `multiple` acks are a
    /// range split
    pub unacked: BTreeMap<u64, UnackedEntry>,
    /// Tags of consumers owned by this channel
    pub consumer_tags: Vec<String>,
    pub assembly: ContentAssembly,
}

impl Channel {
    pub(crate) fn new(number: u16) -> Self {
        Self {
            number,
            state: ChannelState::Open,
            flow_active: true,
            qos: Qos::default(),
            delivery_tag: 0,
            unacked: BTreeMap::new(),
            consumer_tags: Vec::new(),
            assembly: ContentAssembly::Idle,
        }
    }

    /// Next delivery tag; strictly increasing from 1
    pub(crate) fn next_delivery_tag(&mut self) -> u64 {
        self.delivery_tag += 1;
        self.delivery_tag
    }

    /// Whether the prefetch window permits another unacked delivery
    pub(crate) fn has_prefetch_capacity(&self) -> bool {
        self.qos.prefetch_count == 0 || self.unacked.len() < self.qos.prefetch_count as usize
    }

    /// Starts assembling a publish
    pub(crate) fn begin_publish(&mut self, publish: PendingPublish) -> Result<(), AmqpException> {
        match self.assembly {
            ContentAssembly::Idle => {
                self.assembly = ContentAssembly::AwaitingHeader(publish);
                Ok(())
            }
            _ => Err(AmqpException::unexpected_frame(
                "publish while assembling a previous message",
            )),
        }
    }

    /// Feeds the content header; a zero body size completes the publish
    pub(crate) fn collect_header(
        &mut self,
        header: ContentHeader,
    ) -> Result<Option<CompletedPublish>, AmqpException> {
        match std::mem::take(&mut self.assembly) {
            ContentAssembly::AwaitingHeader(publish) => {
                if header.body_size == 0 {
                    return Ok(Some(CompletedPublish {
                        publish,
                        header,
                        content: Bytes::new(),
                    }));
                }
                self.assembly = ContentAssembly::AwaitingBody {
                    publish,
                    header,
                    buf: BytesMut::new(),
                };
                Ok(None)
            }
            _ => Err(AmqpException::unexpected_frame(
                "content header without a pending publish",
            )),
        }
    }

    /// Feeds a body frame; completes once the accumulated length reaches the
    /// announced body size, and rejects overruns
    pub(crate) fn collect_body(
        &mut self,
        body: Bytes,
    ) -> Result<Option<CompletedPublish>, AmqpException> {
        match std::mem::take(&mut self.assembly) {
            ContentAssembly::AwaitingBody {
                publish,
                header,
                mut buf,
            } => {
                buf.extend_from_slice(&body);
                let got = buf.len() as u64;
                if got == header.body_size {
                    Ok(Some(CompletedPublish {
                        publish,
                        header,
                        content: buf.freeze(),
                    }))
                } else if got < header.body_size {
                    self.assembly = ContentAssembly::AwaitingBody {
                        publish,
                        header,
                        buf,
                    };
                    Ok(None)
                } else {
                    Err(AmqpException::unexpected_frame(
                        "content body longer than announced",
                    ))
                }
            }
            _ => Err(AmqpException::unexpected_frame(
                "content body without a pending publish",
            )),
        }
    }

    /// Removes one unacked entry by tag
    pub(crate) fn take_unacked(&mut self, delivery_tag: u64) -> Option<UnackedEntry> {
        self.unacked.remove(&delivery_tag)
    }

    /// Removes every unacked entry with tag at most `delivery_tag`, in tag
    /// order; a tag of 0 takes everything outstanding
    pub(crate) fn take_unacked_multiple(&mut self, delivery_tag: u64) -> Vec<UnackedEntry> {
        if delivery_tag == 0 {
            return self.take_all_unacked();
        }
        let keep = match delivery_tag.checked_add(1) {
            Some(next) => self.unacked.split_off(&next),
            None => BTreeMap::new(),
        };
        let taken = std::mem::replace(&mut self.unacked, keep);
        taken.into_values().collect()
    }

    /// Removes every unacked entry in delivery order
    pub(crate) fn take_all_unacked(&mut self) -> Vec<UnackedEntry> {
        std::mem::take(&mut self.unacked).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Message;
    use chrono::Utc;
    use ferrumq_codec::BasicProperties;

    fn pending() -> PendingPublish {
        PendingPublish {
            exchange: String::new(),
            routing_key: "q".into(),
            mandatory: false,
            immediate: false,
        }
    }

    fn unacked(tag: u64) -> UnackedEntry {
        UnackedEntry {
            delivery_tag: tag,
            message: Message {
                id: format!("m{tag}"),
                exchange: String::new(),
                routing_key: "q".into(),
                mandatory: false,
                immediate: false,
                properties: BasicProperties::default(),
                content: Bytes::new(),
                timestamp: Utc::now(),
                redelivered: false,
                origin: None,
            },
            queue: "q".into(),
            consumer_tag: "c".into(),
            delivered_at: Utc::now(),
        }
    }

    #[test]
    fn delivery_tags_start_at_one_and_increase() {
        let mut ch = Channel::new(1);
        assert_eq!(ch.next_delivery_tag(), 1);
        assert_eq!(ch.next_delivery_tag(), 2);
        assert_eq!(ch.next_delivery_tag(), 3);
    }

    #[test]
    fn prefetch_window_counts_unacked() {
        let mut ch = Channel::new(1);
        ch.qos.prefetch_count = 1;
        assert!(ch.has_prefetch_capacity());
        ch.unacked.insert(1, unacked(1));
        assert!(!ch.has_prefetch_capacity());
        ch.take_unacked(1).unwrap();
        assert!(ch.has_prefetch_capacity());
    }

    #[test]
    fn zero_body_publish_completes_on_header() {
        let mut ch = Channel::new(1);
        ch.begin_publish(pending()).unwrap();
        let done = ch
            .collect_header(ContentHeader::basic(0, BasicProperties::default()))
            .unwrap()
            .unwrap();
        assert!(done.content.is_empty());
        assert!(matches!(ch.assembly, ContentAssembly::Idle));
    }

    #[test]
    fn split_body_accumulates_until_announced_size() {
        let mut ch = Channel::new(1);
        ch.begin_publish(pending()).unwrap();
        assert!(ch
            .collect_header(ContentHeader::basic(10, BasicProperties::default()))
            .unwrap()
            .is_none());
        assert!(ch.collect_body(Bytes::from_static(b"hello")).unwrap().is_none());
        let done = ch
            .collect_body(Bytes::from_static(b"world"))
            .unwrap()
            .unwrap();
        assert_eq!(&done.content[..], b"helloworld");
    }

    #[test]
    fn out_of_order_frames_are_unexpected() {
        let mut ch = Channel::new(1);
        assert!(ch
            .collect_header(ContentHeader::basic(1, BasicProperties::default()))
            .is_err());
        assert!(ch.collect_body(Bytes::from_static(b"x")).is_err());

        ch.begin_publish(pending()).unwrap();
        assert!(ch.begin_publish(pending()).is_err());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut ch = Channel::new(1);
        ch.begin_publish(pending()).unwrap();
        ch.collect_header(ContentHeader::basic(3, BasicProperties::default()))
            .unwrap();
        assert!(ch.collect_body(Bytes::from_static(b"toolong")).is_err());
    }

    #[test]
    fn multiple_ack_takes_tags_up_to_and_including() {
        let mut ch = Channel::new(1);
        for tag in 1..=5 {
            ch.unacked.insert(tag, unacked(tag));
        }
        let taken = ch.take_unacked_multiple(3);
        let tags: Vec<u64> = taken.iter().map(|e| e.delivery_tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(ch.unacked.len(), 2);

        let rest = ch.take_unacked_multiple(0);
        assert_eq!(rest.len(), 2);
        assert!(ch.unacked.is_empty());
    }
}
