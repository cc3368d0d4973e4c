//! The broker core task
//!
//! One task owns every global table: exchanges, queues, bindings, the
//! consumer registry, the connection registry, and the persistence handles.
//! Connection engines feed it frames over a bounded channel and it answers
//! by pushing frames onto per-connection outbound queues, so all entity
//! mutation is serialized without any locking.

use std::collections::HashMap;
use std::net::SocketAddr;

use ferrumq_codec::constants::reply_code;
use ferrumq_codec::methods::{basic, channel as channel_m, connection as connection_m};
use ferrumq_codec::{
    BasicMethod, BasicProperties, ChannelMethod, ConnectionMethod, FieldTable, Frame, FramePayload,
    Method,
};
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::control::{BrokerControl, NewConnection, Query};
use crate::broker::{
    BindingInfo, BrokerStatus, ConnectionInfo, ConsumerInfo, ExchangeInfo, QueueInfo,
};
use crate::channel::{Channel, ChannelState};
use crate::connection::{ConnectionState, TuneParams};
use crate::entities::{Binding, ConnectionId, Consumer, Exchange, Message, Queue, UnackedEntry};
use crate::error::{AmqpException, ExceptionScope};
use crate::events::{BrokerEvent, EventSink};
use crate::persistence::Persistence;
use crate::routing::TopicCache;

/// A connection as the core sees it: negotiated parameters, its channels,
/// and the queue of frames to write to its socket
#[derive(Debug)]
pub(crate) struct ConnectionEntry {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub channels: HashMap<u16, Channel>,
    pub tune: TuneParams,
    pub client_properties: FieldTable,
    pub virtual_host: String,
    pub username: String,
    pub state: ConnectionState,
    /// Sequence for server-generated consumer tags on this connection
    pub ctag_seq: u64,
}

#[derive(Debug)]
pub(crate) struct BrokerCore {
    pub(crate) exchanges: IndexMap<String, Exchange>,
    pub(crate) queues: IndexMap<String, Queue>,
    pub(crate) bindings: Vec<Binding>,
    /// Consumers by tag; queues keep the per-queue rotation order
    pub(crate) consumers: IndexMap<String, Consumer>,
    pub(crate) connections: HashMap<ConnectionId, ConnectionEntry>,
    pub(crate) topics: TopicCache,
    pub(crate) persistence: Persistence,
    pub(crate) events: EventSink,
    control: mpsc::Receiver<BrokerControl>,
}

impl BrokerCore {
    pub(crate) fn new(
        persistence: Persistence,
        events: EventSink,
        control: mpsc::Receiver<BrokerControl>,
    ) -> Self {
        Self {
            exchanges: IndexMap::new(),
            queues: IndexMap::new(),
            bindings: Vec::new(),
            consumers: IndexMap::new(),
            connections: HashMap::new(),
            topics: TopicCache::default(),
            persistence,
            events,
            control,
        }
    }

    /// Installs recovered durable state, then merges the built-in exchanges
    pub(crate) fn install(
        &mut self,
        exchanges: Vec<Exchange>,
        queues: Vec<Queue>,
        bindings: Vec<Binding>,
        messages: Vec<(String, Message)>,
    ) {
        for exchange in exchanges {
            self.exchanges.insert(exchange.name.clone(), exchange);
        }
        for queue in queues {
            self.queues.insert(queue.name.clone(), queue);
        }
        self.bindings = bindings;
        for (queue_name, message) in messages {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.messages.push_back(message);
            }
        }
        for exchange in Exchange::defaults() {
            self.exchanges
                .entry(exchange.name.clone())
                .or_insert(exchange);
        }
    }

    /// Processes commands until shutdown
    pub(crate) async fn run(mut self) {
        while let Some(control) = self.control.recv().await {
            match control {
                BrokerControl::Register(new) => self.on_register(*new),
                BrokerControl::Inbound { connection, frame } => {
                    self.on_inbound(connection, frame).await;
                }
                BrokerControl::Disconnected { connection, error } => {
                    self.on_disconnected(connection, error).await;
                }
                BrokerControl::Query(query) => self.on_query(query),
                BrokerControl::Shutdown { done } => {
                    self.on_shutdown().await;
                    let _ = done.send(());
                    return;
                }
            }
        }
    }

    /* ------------------------------ inbound ------------------------------ */

    fn on_register(&mut self, new: NewConnection) {
        info!(connection = %new.id, peer = %new.peer_addr, vhost = %new.virtual_host, "connection registered");
        self.events.emit(BrokerEvent::ConnectionOpen {
            id: new.id,
            peer_addr: new.peer_addr,
        });
        self.connections.insert(
            new.id,
            ConnectionEntry {
                id: new.id,
                peer_addr: new.peer_addr,
                outbound: new.outbound,
                channels: HashMap::new(),
                tune: new.tune,
                client_properties: new.client_properties,
                virtual_host: new.virtual_host,
                username: new.username,
                state: ConnectionState::Open,
                ctag_seq: 0,
            },
        );
    }

    async fn on_inbound(&mut self, connection: ConnectionId, frame: Frame) {
        let Some(entry) = self.connections.get(&connection) else {
            // raced with connection cleanup
            return;
        };

        if entry.state == ConnectionState::Closing {
            // only the close confirmation matters now
            if frame.channel == 0
                && matches!(
                    frame.payload,
                    FramePayload::Method(Method::Connection(ConnectionMethod::CloseOk))
                )
            {
                self.finalize_connection(connection);
            }
            return;
        }

        if frame.channel == 0 {
            self.on_connection_frame(connection, frame).await;
            return;
        }

        let channel_no = frame.channel;
        if let Err(exception) = self.on_channel_frame(connection, channel_no, frame).await {
            self.raise(connection, channel_no, exception).await;
        }
    }

    async fn on_connection_frame(&mut self, connection: ConnectionId, frame: Frame) {
        match frame.payload {
            FramePayload::Method(Method::Connection(ConnectionMethod::Close(close))) => {
                debug!(connection = %connection, code = close.reply_code, text = %close.reply_text,
                       "client closing connection");
                // stop deliveries to this connection before requeueing
                if let Some(entry) = self.connections.get_mut(&connection) {
                    entry.state = ConnectionState::Closing;
                }
                self.teardown_connection_resources(connection).await;
                self.send_method(connection, 0, ConnectionMethod::CloseOk);
                self.finalize_connection(connection);
            }
            FramePayload::Method(Method::Connection(ConnectionMethod::CloseOk)) => {
                // stray Close-Ok outside the closing state; nothing to do
            }
            _ => {
                let exception = AmqpException::command_invalid(
                    "COMMAND_INVALID - only connection methods are valid on channel 0",
                );
                self.raise(connection, 0, exception).await;
            }
        }
    }

    /// Turns a handler exception into the close sequence toward the client
    pub(crate) async fn raise(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        exception: AmqpException,
    ) {
        let scope = match exception.scope {
            // a channel exception on a channel we do not know escalates
            ExceptionScope::Channel
                if channel_no == 0
                    || !self
                        .connections
                        .get(&connection)
                        .is_some_and(|e| e.channels.contains_key(&channel_no)) =>
            {
                ExceptionScope::Connection
            }
            scope => scope,
        };

        warn!(connection = %connection, channel = channel_no, code = exception.code,
              text = %exception.text, ?scope, "amqp exception");

        match scope {
            ExceptionScope::Channel => {
                Box::pin(self.teardown_channel_resources(connection, channel_no)).await;
                if let Some(channel) = self
                    .connections
                    .get_mut(&connection)
                    .and_then(|e| e.channels.get_mut(&channel_no))
                {
                    channel.state = ChannelState::Closing;
                }
                self.send_method(
                    connection,
                    channel_no,
                    ChannelMethod::Close(channel_m::Close {
                        reply_code: exception.code,
                        reply_text: exception.text,
                        class_id: exception.class_id,
                        method_id: exception.method_id,
                    }),
                );
            }
            ExceptionScope::Connection => {
                if let Some(entry) = self.connections.get_mut(&connection) {
                    entry.state = ConnectionState::Closing;
                }
                Box::pin(self.teardown_connection_resources(connection)).await;
                self.send_method(
                    connection,
                    0,
                    ConnectionMethod::Close(connection_m::Close {
                        reply_code: exception.code,
                        reply_text: exception.text,
                        class_id: exception.class_id,
                        method_id: exception.method_id,
                    }),
                );
                self.events.emit(BrokerEvent::ConnectionError {
                    id: connection,
                    message: format!("{} {}", exception.code, "connection exception"),
                });
            }
        }
    }

    async fn on_disconnected(&mut self, connection: ConnectionId, error: Option<String>) {
        let Some(entry) = self.connections.get_mut(&connection) else {
            return;
        };
        entry.state = ConnectionState::Closing;
        self.teardown_connection_resources(connection).await;
        self.connections.remove(&connection);
        match error {
            Some(message) => {
                self.events
                    .emit(BrokerEvent::ConnectionError { id: connection, message });
                self.events.emit(BrokerEvent::ConnectionClose { id: connection });
            }
            None => self.events.emit(BrokerEvent::ConnectionClose { id: connection }),
        }
    }

    /// Drops the registry entry; the engine sees its outbound close and
    /// finishes writing whatever is queued (the Close-Ok included)
    fn finalize_connection(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        self.events
            .emit(BrokerEvent::ConnectionClose { id: connection });
    }

    /* ------------------------------ teardown ------------------------------ */

    /// Requeues unacked deliveries and cancels consumers for one channel
    pub(crate) async fn teardown_channel_resources(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
    ) {
        let Some(entry) = self.connections.get_mut(&connection) else {
            return;
        };
        let Some(channel) = entry.channels.get_mut(&channel_no) else {
            return;
        };

        let unacked = channel.take_all_unacked();
        let consumer_tags = std::mem::take(&mut channel.consumer_tags);
        channel.assembly = Default::default();

        let affected = self.requeue_entries(unacked, true);
        for tag in consumer_tags {
            self.remove_consumer(&tag, false);
        }

        // queues that just lost their last consumer may be auto-delete
        let reap: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.ready_for_auto_delete())
            .map(|q| q.name.clone())
            .collect();
        for name in reap {
            if let Err(err) = self.delete_queue_internal(&name).await {
                error!(%err, queue = %name, "failed deleting auto-delete queue");
            }
        }

        for queue_name in affected {
            if let Err(err) = self.dispatch_queue(&queue_name).await {
                self.persistence_failure(connection, err).await;
                return;
            }
        }
    }

    /// Requeues, cancels, and reaps exclusive queues for a whole connection
    pub(crate) async fn teardown_connection_resources(&mut self, connection: ConnectionId) {
        let channel_numbers: Vec<u16> = match self.connections.get(&connection) {
            Some(entry) => entry.channels.keys().copied().collect(),
            None => return,
        };
        for channel_no in channel_numbers {
            self.teardown_channel_resources(connection, channel_no).await;
        }
        if let Some(entry) = self.connections.get_mut(&connection) {
            entry.channels.clear();
        }

        // exclusive queues die with their connection
        let owned: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.exclusive_owner == Some(connection))
            .map(|q| q.name.clone())
            .collect();
        for name in owned {
            if let Err(err) = self.delete_queue_internal(&name).await {
                error!(%err, queue = %name, "failed deleting exclusive queue");
            }
        }
    }

    /* ------------------------- entity bookkeeping ------------------------- */

    /// Requeues unacked entries to the head (or tail) of their source
    /// queues, preserving delivery order; returns the affected queue names
    pub(crate) fn requeue_entries(
        &mut self,
        mut entries: Vec<UnackedEntry>,
        to_head: bool,
    ) -> Vec<String> {
        let mut affected: Vec<String> = Vec::new();
        if to_head {
            // reverse so the oldest delivery ends up at the very front
            entries.reverse();
        }
        for entry in entries {
            let Some(queue) = self.queues.get_mut(&entry.queue) else {
                // queue deleted while the delivery was in flight
                continue;
            };
            let mut message = entry.message;
            message.redelivered = true;
            if to_head {
                queue.messages.push_front(message);
            } else {
                queue.messages.push_back(message);
            }
            if !affected.contains(&entry.queue) {
                affected.push(entry.queue);
            }
        }
        affected
    }

    /// Removes a consumer from the registry, its queue, and its channel.
    /// `notify` sends `Basic.Cancel` to the owning channel for consumers
    /// cancelled by the broker (queue deletion).
    pub(crate) fn remove_consumer(&mut self, tag: &str, notify: bool) {
        let Some(consumer) = self.consumers.shift_remove(tag) else {
            return;
        };
        if let Some(queue) = self.queues.get_mut(&consumer.queue) {
            if let Some(at) = queue.consumer_tags.iter().position(|t| t == tag) {
                queue.consumer_tags.remove(at);
                if at < queue.next_consumer && queue.next_consumer > 0 {
                    queue.next_consumer -= 1;
                }
                if !queue.consumer_tags.is_empty() {
                    queue.next_consumer %= queue.consumer_tags.len();
                } else {
                    queue.next_consumer = 0;
                }
            }
        }
        if let Some(channel) = self
            .connections
            .get_mut(&consumer.connection)
            .and_then(|e| e.channels.get_mut(&consumer.channel))
        {
            channel.consumer_tags.retain(|t| t != tag);
        }
        if notify {
            self.send_method(
                consumer.connection,
                consumer.channel,
                BasicMethod::Cancel(basic::Cancel {
                    consumer_tag: consumer.tag.clone(),
                    nowait: true,
                }),
            );
        }
        self.events.emit(BrokerEvent::ConsumerCancelled {
            tag: consumer.tag.clone(),
            queue: consumer.queue.clone(),
        });
    }

    /// Deletes a queue with everything hanging off it: consumers (notified),
    /// bindings, persistent messages, snapshots. Returns the dropped
    /// message count.
    pub(crate) async fn delete_queue_internal(&mut self, name: &str) -> std::io::Result<u32> {
        let Some(mut queue) = self.queues.shift_remove(name) else {
            return Ok(0);
        };
        let message_count = queue.message_count();

        for tag in std::mem::take(&mut queue.consumer_tags) {
            self.remove_consumer(&tag, true);
        }

        let removed_bindings: Vec<Binding> = {
            let (kept, removed): (Vec<Binding>, Vec<Binding>) = std::mem::take(&mut self.bindings)
                .into_iter()
                .partition(|b| b.destination != name);
            self.bindings = kept;
            removed
        };
        let affected_sources: Vec<String> =
            removed_bindings.iter().map(|b| b.source.clone()).collect();
        for binding in removed_bindings {
            self.events.emit(BrokerEvent::BindingDeleted {
                source: binding.source,
                destination: binding.destination,
                routing_key: binding.routing_key,
            });
        }

        if queue.durable {
            for message in &queue.messages {
                if message.is_persistent() {
                    self.persistence.message_removed(name, &message.id).await?;
                }
            }
            self.persistence.save_queues(&self.queues).await?;
            self.persistence
                .save_bindings(&self.bindings, &self.queues)
                .await?;
        }

        self.events.emit(BrokerEvent::QueueDeleted {
            name: name.to_string(),
        });
        debug!(queue = %name, messages = message_count, "queue deleted");

        for source in affected_sources {
            self.reap_auto_delete_exchange(&source).await?;
        }
        Ok(message_count)
    }

    /// Deletes an auto-delete exchange once its last binding is gone
    pub(crate) async fn reap_auto_delete_exchange(&mut self, name: &str) -> std::io::Result<()> {
        let dead = self.exchanges.get(name).is_some_and(|e| {
            e.auto_delete && !e.is_default && !self.bindings.iter().any(|b| b.source == *name)
        });
        if !dead {
            return Ok(());
        }
        if let Some(exchange) = self.exchanges.shift_remove(name) {
            if exchange.durable {
                self.persistence.save_exchanges(&self.exchanges).await?;
            }
            self.events.emit(BrokerEvent::ExchangeDeleted {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// A persistence write failed mid-operation: connection-level 541
    pub(crate) async fn persistence_failure(
        &mut self,
        connection: ConnectionId,
        err: std::io::Error,
    ) {
        error!(%err, "persistence failure");
        self.events.emit(BrokerEvent::Error {
            message: format!("persistence failure: {err}"),
        });
        self.raise(
            connection,
            0,
            AmqpException::internal_error(format!("INTERNAL_ERROR - persistence failure: {err}")),
        )
        .await;
    }

    /* ------------------------------ outbound ------------------------------ */

    /// Queues one frame for a connection's writer; a full or closed queue
    /// means the connection is going away and the frame can be dropped
    pub(crate) fn send_frame(&self, connection: ConnectionId, frame: Frame) {
        if let Some(entry) = self.connections.get(&connection) {
            let _ = entry.outbound.send(frame);
        }
    }

    pub(crate) fn send_method(
        &self,
        connection: ConnectionId,
        channel_no: u16,
        method: impl Into<Method>,
    ) {
        self.send_frame(connection, Frame::method(channel_no, method));
    }

    /// Sends a content-bearing method: the method frame, a header frame,
    /// and the body split so every frame fits the connection's frame_max
    pub(crate) fn send_content(
        &self,
        connection: ConnectionId,
        channel_no: u16,
        method: impl Into<Method>,
        properties: &BasicProperties,
        content: &bytes::Bytes,
    ) {
        use ferrumq_codec::constants::FRAME_OVERHEAD;
        use ferrumq_codec::ContentHeader;

        let Some(entry) = self.connections.get(&connection) else {
            return;
        };
        let max_chunk = (entry.tune.frame_max as usize).saturating_sub(FRAME_OVERHEAD).max(1);

        self.send_frame(connection, Frame::method(channel_no, method));
        self.send_frame(
            connection,
            Frame::header(
                channel_no,
                ContentHeader::basic(content.len() as u64, properties.clone()),
            ),
        );
        let mut offset = 0;
        while offset < content.len() {
            let end = (offset + max_chunk).min(content.len());
            self.send_frame(connection, Frame::body(channel_no, content.slice(offset..end)));
            offset = end;
        }
    }

    /* ------------------------------ queries ------------------------------ */

    fn on_query(&self, query: Query) {
        match query {
            Query::Status(reply) => {
                let _ = reply.send(BrokerStatus {
                    connections: self.connections.len(),
                    channels: self.connections.values().map(|c| c.channels.len()).sum(),
                    exchanges: self.exchanges.len(),
                    queues: self.queues.len(),
                    bindings: self.bindings.len(),
                    consumers: self.consumers.len(),
                    messages: self.queues.values().map(|q| q.messages.len()).sum(),
                });
            }
            Query::Connections(reply) => {
                let _ = reply.send(
                    self.connections
                        .values()
                        .map(|entry| ConnectionInfo {
                            id: entry.id,
                            peer_addr: entry.peer_addr,
                            virtual_host: entry.virtual_host.clone(),
                            username: entry.username.clone(),
                            channels: entry.channels.len(),
                            client_properties: entry.client_properties.clone(),
                        })
                        .collect(),
                );
            }
            Query::Exchanges(reply) => {
                let _ = reply.send(
                    self.exchanges
                        .values()
                        .map(|exchange| ExchangeInfo {
                            name: exchange.name.clone(),
                            kind: exchange.kind.as_str().to_string(),
                            durable: exchange.durable,
                            auto_delete: exchange.auto_delete,
                            internal: exchange.internal,
                            is_default: exchange.is_default,
                        })
                        .collect(),
                );
            }
            Query::Queues(reply) => {
                let _ = reply.send(
                    self.queues
                        .values()
                        .map(|queue| QueueInfo {
                            name: queue.name.clone(),
                            durable: queue.durable,
                            exclusive: queue.exclusive,
                            auto_delete: queue.auto_delete,
                            messages: queue.messages.len(),
                            consumers: queue.consumer_tags.len(),
                        })
                        .collect(),
                );
            }
            Query::Bindings(reply) => {
                let _ = reply.send(
                    self.bindings
                        .iter()
                        .map(|binding| BindingInfo {
                            source: binding.source.clone(),
                            destination: binding.destination.clone(),
                            routing_key: binding.routing_key.clone(),
                        })
                        .collect(),
                );
            }
            Query::Consumers(reply) => {
                let _ = reply.send(
                    self.consumers
                        .values()
                        .map(|consumer| ConsumerInfo {
                            tag: consumer.tag.clone(),
                            queue: consumer.queue.clone(),
                            connection: consumer.connection,
                            channel: consumer.channel,
                            no_ack: consumer.no_ack,
                            exclusive: consumer.exclusive,
                        })
                        .collect(),
                );
            }
        }
    }

    /* ------------------------------ shutdown ------------------------------ */

    async fn on_shutdown(&mut self) {
        info!(connections = self.connections.len(), "broker core shutting down");
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.send_method(
                id,
                0,
                ConnectionMethod::Close(connection_m::Close {
                    reply_code: reply_code::CONNECTION_FORCED,
                    reply_text: "CONNECTION_FORCED - broker shutdown".to_string(),
                    class_id: 0,
                    method_id: 0,
                }),
            );
        }
        // dropping the entries closes every outbound queue; engines drain
        // the Close frame and hang up
        self.connections.clear();
        if let Err(err) = self.persistence.close().await {
            error!(%err, "failed flushing persistence on shutdown");
            self.events.emit(BrokerEvent::Error {
                message: format!("persistence flush failed: {err}"),
            });
        }
    }
}
