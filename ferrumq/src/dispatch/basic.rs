//! Basic-class method handlers: qos, consume, publish, get, and the
//! acknowledgement family

use chrono::Utc;
use ferrumq_codec::constants::reply_code;
use ferrumq_codec::methods::basic::{
    Ack, Cancel, CancelOk, Consume, ConsumeOk, Get, GetEmpty, GetOk, Nack, Publish,
    Qos as QosArgs, Recover, Reject, Return,
};
use ferrumq_codec::BasicMethod;
use tracing::debug;
use uuid::Uuid;

use crate::broker::core::BrokerCore;
use crate::channel::{CompletedPublish, PendingPublish, Qos};
use crate::entities::{generated_consumer_tag, ConnectionId, Consumer, Message, UnackedEntry};
use crate::error::AmqpException;
use crate::events::BrokerEvent;
use crate::persistence::Persistence;
use crate::routing;

impl BrokerCore {
    pub(crate) async fn on_basic_method(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        method: BasicMethod,
    ) -> Result<(), AmqpException> {
        match method {
            BasicMethod::Qos(args) => self.on_basic_qos(connection, channel_no, args).await,
            BasicMethod::Consume(args) => self.on_basic_consume(connection, channel_no, args).await,
            BasicMethod::Cancel(args) => self.on_basic_cancel(connection, channel_no, args).await,
            BasicMethod::Publish(args) => self.on_basic_publish(connection, channel_no, args).await,
            BasicMethod::Get(args) => self.on_basic_get(connection, channel_no, args).await,
            BasicMethod::Ack(args) => self.on_basic_ack(connection, channel_no, args).await,
            BasicMethod::Reject(args) => self.on_basic_reject(connection, channel_no, args).await,
            BasicMethod::Nack(args) => self.on_basic_nack(connection, channel_no, args).await,
            BasicMethod::Recover(args) => {
                self.on_basic_recover(connection, channel_no, args, true).await
            }
            BasicMethod::RecoverAsync(args) => {
                self.on_basic_recover(connection, channel_no, args, false).await
            }
            BasicMethod::QosOk
            | BasicMethod::ConsumeOk(_)
            | BasicMethod::CancelOk(_)
            | BasicMethod::Return(_)
            | BasicMethod::Deliver(_)
            | BasicMethod::GetOk(_)
            | BasicMethod::GetEmpty(_)
            | BasicMethod::RecoverOk => Err(AmqpException::command_invalid(
                "COMMAND_INVALID - reply method from client",
            )),
        }
    }

    async fn on_basic_qos(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: QosArgs,
    ) -> Result<(), AmqpException> {
        let channel = self.channel_mut(connection, channel_no)?;
        channel.qos = Qos {
            prefetch_size: args.prefetch_size,
            prefetch_count: args.prefetch_count,
            global: args.global,
        };
        self.send_method(connection, channel_no, BasicMethod::QosOk);
        // a raised window may unblock waiting deliveries
        self.dispatch_channel_queues(connection, channel_no).await?;
        Ok(())
    }

    async fn on_basic_consume(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Consume,
    ) -> Result<(), AmqpException> {
        self.queue_accessible(connection, &args.queue)?;

        {
            let queue = &self.queues[&args.queue];
            if args.exclusive && !queue.consumer_tags.is_empty() {
                return Err(AmqpException::access_refused(format!(
                    "ACCESS_REFUSED - queue '{}' already has consumers",
                    args.queue
                )));
            }
            let blocked = queue
                .consumer_tags
                .iter()
                .filter_map(|tag| self.consumers.get(tag))
                .any(|c| c.exclusive);
            if blocked {
                return Err(AmqpException::access_refused(format!(
                    "ACCESS_REFUSED - queue '{}' has an exclusive consumer",
                    args.queue
                )));
            }
        }

        let tag = if args.consumer_tag.is_empty() {
            let entry = self.entry_mut(connection)?;
            entry.ctag_seq += 1;
            generated_consumer_tag(connection, channel_no, entry.ctag_seq)
        } else {
            if self.consumers.contains_key(&args.consumer_tag) {
                return Err(AmqpException::precondition_failed(format!(
                    "PRECONDITION_FAILED - consumer tag '{}' is already in use",
                    args.consumer_tag
                )));
            }
            args.consumer_tag.clone()
        };

        let channel = self.channel_mut(connection, channel_no)?;
        channel.consumer_tags.push(tag.clone());

        self.consumers.insert(
            tag.clone(),
            Consumer {
                tag: tag.clone(),
                queue: args.queue.clone(),
                connection,
                channel: channel_no,
                no_local: args.no_local,
                no_ack: args.no_ack,
                exclusive: args.exclusive,
                arguments: args.arguments,
            },
        );
        if let Some(queue) = self.queues.get_mut(&args.queue) {
            queue.consumer_tags.push(tag.clone());
            queue.had_consumers = true;
        }
        debug!(consumer = %tag, queue = %args.queue, no_ack = args.no_ack, "consumer created");

        if !args.nowait {
            self.send_method(
                connection,
                channel_no,
                BasicMethod::ConsumeOk(ConsumeOk {
                    consumer_tag: tag.clone(),
                }),
            );
        }
        self.events.emit(BrokerEvent::ConsumerCreated {
            tag,
            queue: args.queue.clone(),
        });
        self.dispatch_queue(&args.queue).await?;
        Ok(())
    }

    async fn on_basic_cancel(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Cancel,
    ) -> Result<(), AmqpException> {
        let owned = self
            .consumers
            .get(&args.consumer_tag)
            .is_some_and(|c| c.connection == connection && c.channel == channel_no);
        let queue_name = owned.then(|| self.consumers[&args.consumer_tag].queue.clone());

        if owned {
            self.remove_consumer(&args.consumer_tag, false);
        }
        if !args.nowait {
            self.send_method(
                connection,
                channel_no,
                BasicMethod::CancelOk(CancelOk {
                    consumer_tag: args.consumer_tag,
                }),
            );
        }
        if let Some(queue_name) = queue_name {
            let reap = self
                .queues
                .get(&queue_name)
                .is_some_and(|q| q.ready_for_auto_delete());
            if reap {
                self.delete_queue_internal(&queue_name).await?;
            }
        }
        Ok(())
    }

    async fn on_basic_publish(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Publish,
    ) -> Result<(), AmqpException> {
        let Some(exchange) = self.exchanges.get(&args.exchange) else {
            return Err(AmqpException::not_found(format!(
                "NOT_FOUND - no exchange '{}'",
                args.exchange
            )));
        };
        if exchange.internal {
            return Err(AmqpException::access_refused(format!(
                "ACCESS_REFUSED - exchange '{}' is internal",
                args.exchange
            )));
        }
        let channel = self.channel_mut(connection, channel_no)?;
        channel.begin_publish(PendingPublish {
            exchange: args.exchange,
            routing_key: args.routing_key,
            mandatory: args.mandatory,
            immediate: args.immediate,
        })
    }

    /// Frame assembly finished: route the message, or return/drop it
    pub(crate) async fn complete_publish(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        done: CompletedPublish,
    ) -> Result<(), AmqpException> {
        let CompletedPublish {
            publish,
            header,
            content,
        } = done;
        let message = Message {
            id: header
                .properties
                .message_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            exchange: publish.exchange,
            routing_key: publish.routing_key,
            mandatory: publish.mandatory,
            // accepted on the wire but deliberately not enforced
            immediate: publish.immediate,
            properties: header.properties,
            content,
            timestamp: Utc::now(),
            redelivered: false,
            origin: Some(connection),
        };
        self.events.emit(BrokerEvent::MessagePublished {
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
        });

        let destinations = match self.exchanges.get(&message.exchange) {
            Some(exchange) => routing::route(
                exchange,
                &self.bindings,
                &self.queues,
                &message.routing_key,
                &mut self.topics,
            ),
            // the exchange vanished between publish and assembly; treat as
            // unroutable
            None => Vec::new(),
        };
        self.events.emit(BrokerEvent::MessageRouted {
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            queues: destinations.len(),
        });

        if destinations.is_empty() {
            if message.mandatory {
                debug!(exchange = %message.exchange, routing_key = %message.routing_key,
                       "returning unroutable mandatory message");
                self.send_content(
                    connection,
                    channel_no,
                    BasicMethod::Return(Return {
                        reply_code: reply_code::NO_CONSUMERS,
                        reply_text: "No route".to_string(),
                        exchange: message.exchange.clone(),
                        routing_key: message.routing_key.clone(),
                    }),
                    &message.properties,
                    &message.content,
                );
                self.events.emit(BrokerEvent::MessageReturned {
                    exchange: message.exchange,
                    routing_key: message.routing_key,
                });
            }
            return Ok(());
        }

        for queue_name in destinations {
            let copy = message.clone();
            let qualifies = {
                let Some(queue) = self.queues.get_mut(&queue_name) else {
                    continue;
                };
                let qualifies = Persistence::qualifies(queue, &copy);
                queue.messages.push_back(copy);
                qualifies
            };
            if qualifies {
                self.persistence
                    .message_stored(&queue_name, &message)
                    .await?;
            }
            self.dispatch_queue(&queue_name).await?;
        }
        Ok(())
    }

    async fn on_basic_get(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Get,
    ) -> Result<(), AmqpException> {
        self.queue_accessible(connection, &args.queue)?;

        let (message, remaining, durable) = {
            let Some(queue) = self.queues.get_mut(&args.queue) else {
                return Err(AmqpException::not_found(format!(
                    "NOT_FOUND - no queue '{}'",
                    args.queue
                )));
            };
            match queue.messages.pop_front() {
                Some(message) => (message, queue.message_count(), queue.durable),
                None => {
                    self.send_method(
                        connection,
                        channel_no,
                        BasicMethod::GetEmpty(GetEmpty::default()),
                    );
                    return Ok(());
                }
            }
        };

        let channel = self.channel_mut(connection, channel_no)?;
        let delivery_tag = channel.next_delivery_tag();
        if !args.no_ack {
            channel.unacked.insert(
                delivery_tag,
                UnackedEntry {
                    delivery_tag,
                    message: message.clone(),
                    queue: args.queue.clone(),
                    consumer_tag: String::new(),
                    delivered_at: Utc::now(),
                },
            );
        }

        self.send_content(
            connection,
            channel_no,
            BasicMethod::GetOk(GetOk {
                delivery_tag,
                redelivered: message.redelivered,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                message_count: remaining,
            }),
            &message.properties,
            &message.content,
        );
        self.events.emit(BrokerEvent::MessageDelivered {
            queue: args.queue.clone(),
            consumer_tag: String::new(),
        });

        if args.no_ack && durable && message.is_persistent() {
            self.persistence
                .message_removed(&args.queue, &message.id)
                .await?;
        }
        Ok(())
    }

    async fn on_basic_ack(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Ack,
    ) -> Result<(), AmqpException> {
        let entries = self.take_acked(connection, channel_no, args.delivery_tag, args.multiple)?;
        for entry in &entries {
            self.forget_if_persistent(entry).await?;
            self.events.emit(BrokerEvent::MessageAcked {
                queue: entry.queue.clone(),
            });
        }
        self.dispatch_channel_queues(connection, channel_no).await?;
        Ok(())
    }

    async fn on_basic_reject(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Reject,
    ) -> Result<(), AmqpException> {
        let entries = self.take_acked(connection, channel_no, args.delivery_tag, false)?;
        self.settle_negative(connection, channel_no, entries, args.requeue, false)
            .await
    }

    async fn on_basic_nack(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Nack,
    ) -> Result<(), AmqpException> {
        let entries = self.take_acked(connection, channel_no, args.delivery_tag, args.multiple)?;
        self.settle_negative(connection, channel_no, entries, args.requeue, true)
            .await
    }

    /// `Basic.Recover`: every unacked delivery on the channel goes back to
    /// its queue; head for `requeue=true`, tail for `requeue=false`
    async fn on_basic_recover(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        args: Recover,
        synchronous: bool,
    ) -> Result<(), AmqpException> {
        let channel = self.channel_mut(connection, channel_no)?;
        let entries = channel.take_all_unacked();
        let affected = self.requeue_entries(entries, args.requeue);
        if synchronous {
            self.send_method(connection, channel_no, BasicMethod::RecoverOk);
        }
        for queue_name in affected {
            self.dispatch_queue(&queue_name).await?;
        }
        Ok(())
    }

    /* ------------------------------ helpers ------------------------------ */

    /// Removes unacked entries for an ack-family method; a single unknown
    /// tag is a precondition failure, `multiple` is lenient
    fn take_acked(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        delivery_tag: u64,
        multiple: bool,
    ) -> Result<Vec<UnackedEntry>, AmqpException> {
        let channel = self.channel_mut(connection, channel_no)?;
        if multiple {
            Ok(channel.take_unacked_multiple(delivery_tag))
        } else {
            channel
                .take_unacked(delivery_tag)
                .map(|entry| vec![entry])
                .ok_or_else(|| {
                    AmqpException::precondition_failed(format!(
                        "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
                    ))
                })
        }
    }

    /// Settles reject/nack entries: requeue to the head or drop for good
    async fn settle_negative(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        entries: Vec<UnackedEntry>,
        requeue: bool,
        nack: bool,
    ) -> Result<(), AmqpException> {
        let queues: Vec<String> = entries.iter().map(|e| e.queue.clone()).collect();
        for queue in &queues {
            let event = if nack {
                BrokerEvent::MessageNacked {
                    queue: queue.clone(),
                }
            } else {
                BrokerEvent::MessageRejected {
                    queue: queue.clone(),
                }
            };
            self.events.emit(event);
        }

        if requeue {
            let affected = self.requeue_entries(entries, true);
            for queue_name in affected {
                self.dispatch_queue(&queue_name).await?;
            }
        } else {
            for entry in &entries {
                self.forget_if_persistent(entry).await?;
            }
        }
        self.dispatch_channel_queues(connection, channel_no).await?;
        Ok(())
    }

    /// Drops the durable record of a settled delivery, if it had one
    async fn forget_if_persistent(&mut self, entry: &UnackedEntry) -> Result<(), AmqpException> {
        let qualifies = self
            .queues
            .get(&entry.queue)
            .is_some_and(|q| Persistence::qualifies(q, &entry.message));
        if qualifies {
            self.persistence
                .message_removed(&entry.queue, &entry.message.id)
                .await?;
        }
        Ok(())
    }
}
