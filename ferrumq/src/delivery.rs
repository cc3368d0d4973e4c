//! Consumer dispatch: eligibility, fair rotation, and delivery framing
//!
//! A queue hands its head message to the first eligible consumer in a
//! rotation that starts one past the previous winner, so every eligible
//! consumer makes progress. Eligibility requires an open channel with
//! active flow and a free prefetch slot (no-ack consumers bypass the
//! prefetch window entirely).

use chrono::Utc;
use ferrumq_codec::methods::basic::Deliver;
use ferrumq_codec::BasicMethod;
use tracing::trace;

use crate::broker::core::BrokerCore;
use crate::channel::ChannelState;
use crate::connection::ConnectionState;
use crate::entities::{Consumer, Message, UnackedEntry};
use crate::events::BrokerEvent;
use crate::persistence::Persistence;

impl BrokerCore {
    /// Drains a queue into its consumers for as long as a message and an
    /// eligible consumer both exist
    pub(crate) async fn dispatch_queue(&mut self, queue_name: &str) -> std::io::Result<()> {
        loop {
            let Some((tag, winner_index, rotation_len)) = self.select_consumer(queue_name) else {
                return Ok(());
            };

            let Some(queue) = self.queues.get_mut(queue_name) else {
                return Ok(());
            };
            queue.next_consumer = (winner_index + 1) % rotation_len;
            let Some(message) = queue.messages.pop_front() else {
                return Ok(());
            };
            let Some(consumer) = self.consumers.get(&tag).cloned() else {
                // consumer vanished between selection and delivery
                if let Some(queue) = self.queues.get_mut(queue_name) {
                    queue.messages.push_front(message);
                }
                continue;
            };
            self.deliver_to_consumer(&consumer, queue_name, message).await?;
        }
    }

    /// Picks the next eligible consumer for the queue's head message;
    /// returns its tag, rotation index, and the rotation length
    fn select_consumer(&self, queue_name: &str) -> Option<(String, usize, usize)> {
        let queue = self.queues.get(queue_name)?;
        let head = queue.messages.front()?;
        let rotation_len = queue.consumer_tags.len();
        if rotation_len == 0 {
            return None;
        }

        for offset in 0..rotation_len {
            let index = (queue.next_consumer + offset) % rotation_len;
            let tag = &queue.consumer_tags[index];
            let Some(consumer) = self.consumers.get(tag) else {
                continue;
            };
            if self.consumer_is_eligible(consumer, head) {
                return Some((tag.clone(), index, rotation_len));
            }
        }
        None
    }

    fn consumer_is_eligible(&self, consumer: &Consumer, head: &Message) -> bool {
        if consumer.no_local && head.origin == Some(consumer.connection) {
            return false;
        }
        let Some(entry) = self.connections.get(&consumer.connection) else {
            return false;
        };
        if entry.state != ConnectionState::Open {
            return false;
        }
        let Some(channel) = entry.channels.get(&consumer.channel) else {
            return false;
        };
        channel.state == ChannelState::Open
            && channel.flow_active
            && (consumer.no_ack || channel.has_prefetch_capacity())
    }

    /// Frames one message to one consumer and tracks the unacked entry
    async fn deliver_to_consumer(
        &mut self,
        consumer: &Consumer,
        queue_name: &str,
        message: Message,
    ) -> std::io::Result<()> {
        let Some(channel) = self
            .connections
            .get_mut(&consumer.connection)
            .and_then(|e| e.channels.get_mut(&consumer.channel))
        else {
            // channel raced away; put the message back
            if let Some(queue) = self.queues.get_mut(queue_name) {
                queue.messages.push_front(message);
            }
            return Ok(());
        };

        let delivery_tag = channel.next_delivery_tag();
        if !consumer.no_ack {
            channel.unacked.insert(
                delivery_tag,
                UnackedEntry {
                    delivery_tag,
                    message: message.clone(),
                    queue: queue_name.to_string(),
                    consumer_tag: consumer.tag.clone(),
                    delivered_at: Utc::now(),
                },
            );
        }

        trace!(consumer = %consumer.tag, queue = %queue_name, delivery_tag,
               redelivered = message.redelivered, "delivering");
        self.send_content(
            consumer.connection,
            consumer.channel,
            BasicMethod::Deliver(Deliver {
                consumer_tag: consumer.tag.clone(),
                delivery_tag,
                redelivered: message.redelivered,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
            }),
            &message.properties,
            &message.content,
        );
        self.events.emit(BrokerEvent::MessageDelivered {
            queue: queue_name.to_string(),
            consumer_tag: consumer.tag.clone(),
        });

        // a no-ack delivery is final: the durable record goes immediately
        if consumer.no_ack {
            let qualifies = self
                .queues
                .get(queue_name)
                .is_some_and(|q| Persistence::qualifies(q, &message));
            if qualifies {
                self.persistence
                    .message_removed(queue_name, &message.id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Redispatches every queue that a channel's consumers feed from,
    /// typically after acks free prefetch slots or flow resumes
    pub(crate) async fn dispatch_channel_queues(
        &mut self,
        connection: crate::entities::ConnectionId,
        channel_no: u16,
    ) -> std::io::Result<()> {
        let queue_names: Vec<String> = self
            .connections
            .get(&connection)
            .and_then(|e| e.channels.get(&channel_no))
            .map(|channel| {
                channel
                    .consumer_tags
                    .iter()
                    .filter_map(|tag| self.consumers.get(tag))
                    .map(|c| c.queue.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut seen = Vec::new();
        for name in queue_names {
            if !seen.contains(&name) {
                self.dispatch_queue(&name).await?;
                seen.push(name);
            }
        }
        Ok(())
    }
}
