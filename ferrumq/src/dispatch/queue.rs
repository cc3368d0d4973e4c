//! Queue-class method handlers

use ferrumq_codec::methods::queue::{
    Bind, Declare, DeclareOk, Delete, DeleteOk, Purge, PurgeOk, Unbind,
};
use ferrumq_codec::QueueMethod;
use tracing::debug;

use crate::broker::core::BrokerCore;
use crate::dispatch::exchange::RESERVED_PREFIX;
use crate::entities::{generated_queue_name, Binding, ConnectionId, Queue};
use crate::error::AmqpException;
use crate::events::BrokerEvent;

impl BrokerCore {
    pub(crate) async fn on_queue_method(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        method: QueueMethod,
    ) -> Result<(), AmqpException> {
        match method {
            QueueMethod::Declare(declare) => {
                self.on_queue_declare(connection, channel_no, declare).await
            }
            QueueMethod::Bind(bind) => self.on_queue_bind(connection, channel_no, bind).await,
            QueueMethod::Unbind(unbind) => {
                self.on_queue_unbind(connection, channel_no, unbind).await
            }
            QueueMethod::Purge(purge) => self.on_queue_purge(connection, channel_no, purge).await,
            QueueMethod::Delete(delete) => {
                self.on_queue_delete(connection, channel_no, delete).await
            }
            QueueMethod::DeclareOk(_)
            | QueueMethod::BindOk
            | QueueMethod::PurgeOk(_)
            | QueueMethod::DeleteOk(_)
            | QueueMethod::UnbindOk => Err(AmqpException::command_invalid(
                "COMMAND_INVALID - reply method from client",
            )),
        }
    }

    /// Checks that `connection` may touch the queue at all: 404 when it is
    /// missing, 405 when it is exclusively owned by someone else
    pub(crate) fn queue_accessible(
        &self,
        connection: ConnectionId,
        name: &str,
    ) -> Result<&Queue, AmqpException> {
        let queue = self.queues.get(name).ok_or_else(|| {
            AmqpException::not_found(format!("NOT_FOUND - no queue '{name}'"))
        })?;
        match queue.exclusive_owner {
            Some(owner) if owner != connection => Err(AmqpException::resource_locked(format!(
                "RESOURCE_LOCKED - queue '{name}' is exclusive to another connection"
            ))),
            _ => Ok(queue),
        }
    }

    async fn on_queue_declare(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        declare: Declare,
    ) -> Result<(), AmqpException> {
        let name = if declare.queue.is_empty() {
            generated_queue_name()
        } else {
            declare.queue.clone()
        };

        if self.queues.contains_key(&name) {
            let queue = self.queue_accessible(connection, &name)?;
            if !declare.passive
                && (queue.durable != declare.durable
                    || queue.exclusive != declare.exclusive
                    || queue.auto_delete != declare.auto_delete)
            {
                return Err(AmqpException::precondition_failed(format!(
                    "PRECONDITION_FAILED - queue '{name}' exists with different properties"
                )));
            }
            if !declare.nowait {
                let reply = DeclareOk {
                    queue: name.clone(),
                    message_count: queue.message_count(),
                    consumer_count: queue.consumer_count(),
                };
                self.send_method(connection, channel_no, QueueMethod::DeclareOk(reply));
            }
            return Ok(());
        }

        if declare.passive {
            return Err(AmqpException::not_found(format!(
                "NOT_FOUND - no queue '{name}'"
            )));
        }
        if !declare.queue.is_empty() && declare.queue.starts_with(RESERVED_PREFIX) {
            return Err(AmqpException::access_refused(format!(
                "ACCESS_REFUSED - queue name '{name}' is reserved"
            )));
        }

        let queue = Queue {
            name: name.clone(),
            durable: declare.durable,
            exclusive: declare.exclusive,
            auto_delete: declare.auto_delete,
            arguments: declare.arguments,
            exclusive_owner: declare.exclusive.then_some(connection),
            messages: Default::default(),
            consumer_tags: Vec::new(),
            next_consumer: 0,
            had_consumers: false,
        };
        debug!(queue = %name, durable = queue.durable, exclusive = queue.exclusive,
               auto_delete = queue.auto_delete, "queue declared");
        self.queues.insert(name.clone(), queue);

        // every queue is reachable through the default exchange under its
        // own name
        let default_binding = Binding {
            source: String::new(),
            destination: name.clone(),
            routing_key: name.clone(),
            arguments: Default::default(),
        };
        self.bindings.push(default_binding);
        self.events.emit(BrokerEvent::BindingCreated {
            source: String::new(),
            destination: name.clone(),
            routing_key: name.clone(),
        });

        if declare.durable {
            self.persistence.save_queues(&self.queues).await?;
            self.persistence
                .save_bindings(&self.bindings, &self.queues)
                .await?;
        }
        self.events.emit(BrokerEvent::QueueCreated { name: name.clone() });

        if !declare.nowait {
            self.send_method(
                connection,
                channel_no,
                QueueMethod::DeclareOk(DeclareOk {
                    queue: name,
                    message_count: 0,
                    consumer_count: 0,
                }),
            );
        }
        Ok(())
    }

    async fn on_queue_bind(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        bind: Bind,
    ) -> Result<(), AmqpException> {
        self.queue_accessible(connection, &bind.queue)?;
        if bind.exchange.is_empty() {
            return Err(AmqpException::access_refused(
                "ACCESS_REFUSED - cannot bind to the default exchange",
            ));
        }
        if !self.exchanges.contains_key(&bind.exchange) {
            return Err(AmqpException::not_found(format!(
                "NOT_FOUND - no exchange '{}'",
                bind.exchange
            )));
        }

        let exists = self
            .bindings
            .iter()
            .any(|b| b.same_identity(&bind.exchange, &bind.queue, &bind.routing_key));
        if !exists {
            self.bindings.push(Binding {
                source: bind.exchange.clone(),
                destination: bind.queue.clone(),
                routing_key: bind.routing_key.clone(),
                arguments: bind.arguments,
            });
            if self.queues.get(&bind.queue).is_some_and(|q| q.durable) {
                self.persistence
                    .save_bindings(&self.bindings, &self.queues)
                    .await?;
            }
            debug!(exchange = %bind.exchange, queue = %bind.queue,
                   routing_key = %bind.routing_key, "binding created");
            self.events.emit(BrokerEvent::BindingCreated {
                source: bind.exchange,
                destination: bind.queue,
                routing_key: bind.routing_key,
            });
        }
        if !bind.nowait {
            self.send_method(connection, channel_no, QueueMethod::BindOk);
        }
        Ok(())
    }

    async fn on_queue_unbind(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        unbind: Unbind,
    ) -> Result<(), AmqpException> {
        self.queue_accessible(connection, &unbind.queue)?;
        if !self.exchanges.contains_key(&unbind.exchange) {
            return Err(AmqpException::not_found(format!(
                "NOT_FOUND - no exchange '{}'",
                unbind.exchange
            )));
        }

        let at = self
            .bindings
            .iter()
            .position(|b| b.same_identity(&unbind.exchange, &unbind.queue, &unbind.routing_key));
        if let Some(at) = at {
            let binding = self.bindings.remove(at);
            if self.queues.get(&binding.destination).is_some_and(|q| q.durable) {
                self.persistence
                    .save_bindings(&self.bindings, &self.queues)
                    .await?;
            }
            self.events.emit(BrokerEvent::BindingDeleted {
                source: binding.source,
                destination: binding.destination,
                routing_key: binding.routing_key,
            });
            self.reap_auto_delete_exchange(&unbind.exchange).await?;
        }
        // unbinding a binding that is not there is a success
        self.send_method(connection, channel_no, QueueMethod::UnbindOk);
        Ok(())
    }

    async fn on_queue_purge(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        purge: Purge,
    ) -> Result<(), AmqpException> {
        self.queue_accessible(connection, &purge.queue)?;

        let queue = self
            .queues
            .get_mut(&purge.queue)
            .ok_or_else(|| AmqpException::not_found("NOT_FOUND - queue vanished"))?;
        let drained: Vec<_> = queue.messages.drain(..).collect();
        let message_count = drained.len() as u32;
        let durable = queue.durable;
        for message in &drained {
            if durable && message.is_persistent() {
                self.persistence
                    .message_removed(&purge.queue, &message.id)
                    .await?;
            }
        }
        debug!(queue = %purge.queue, messages = message_count, "queue purged");
        self.events.emit(BrokerEvent::QueuePurged {
            name: purge.queue.clone(),
            messages: message_count,
        });
        if !purge.nowait {
            self.send_method(
                connection,
                channel_no,
                QueueMethod::PurgeOk(PurgeOk { message_count }),
            );
        }
        Ok(())
    }

    async fn on_queue_delete(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        delete: Delete,
    ) -> Result<(), AmqpException> {
        if !self.queues.contains_key(&delete.queue) {
            // idempotent delete
            if !delete.nowait {
                self.send_method(
                    connection,
                    channel_no,
                    QueueMethod::DeleteOk(DeleteOk { message_count: 0 }),
                );
            }
            return Ok(());
        }
        let queue = self.queue_accessible(connection, &delete.queue)?;
        if delete.if_unused && queue.consumer_count() > 0 {
            return Err(AmqpException::precondition_failed(format!(
                "PRECONDITION_FAILED - queue '{}' still has consumers",
                delete.queue
            )));
        }
        if delete.if_empty && queue.message_count() > 0 {
            return Err(AmqpException::precondition_failed(format!(
                "PRECONDITION_FAILED - queue '{}' is not empty",
                delete.queue
            )));
        }

        let message_count = self.delete_queue_internal(&delete.queue).await?;
        if !delete.nowait {
            self.send_method(
                connection,
                channel_no,
                QueueMethod::DeleteOk(DeleteOk { message_count }),
            );
        }
        Ok(())
    }
}
