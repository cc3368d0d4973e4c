//! Exchange-class method handlers

use ferrumq_codec::methods::exchange::{Declare, Delete};
use ferrumq_codec::ExchangeMethod;
use tracing::debug;

use crate::broker::core::BrokerCore;
use crate::entities::{Binding, ConnectionId, Exchange, ExchangeKind};
use crate::error::AmqpException;
use crate::events::BrokerEvent;

/// Names under this prefix belong to the server
pub(crate) const RESERVED_PREFIX: &str = "amq.";

impl BrokerCore {
    pub(crate) async fn on_exchange_method(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        method: ExchangeMethod,
    ) -> Result<(), AmqpException> {
        match method {
            ExchangeMethod::Declare(declare) => {
                self.on_exchange_declare(connection, channel_no, declare).await
            }
            ExchangeMethod::Delete(delete) => {
                self.on_exchange_delete(connection, channel_no, delete).await
            }
            ExchangeMethod::DeclareOk | ExchangeMethod::DeleteOk => Err(
                AmqpException::command_invalid("COMMAND_INVALID - reply method from client"),
            ),
        }
    }

    async fn on_exchange_declare(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        declare: Declare,
    ) -> Result<(), AmqpException> {
        if let Some(existing) = self.exchanges.get(&declare.exchange) {
            if !declare.passive {
                let kind = ExchangeKind::parse(&declare.kind).ok_or_else(|| {
                    AmqpException::command_invalid(format!(
                        "COMMAND_INVALID - unknown exchange type '{}'",
                        declare.kind
                    ))
                })?;
                if existing.kind != kind || existing.durable != declare.durable {
                    return Err(AmqpException::precondition_failed(format!(
                        "PRECONDITION_FAILED - exchange '{}' exists as {} durable={}",
                        declare.exchange,
                        existing.kind.as_str(),
                        existing.durable
                    )));
                }
            }
            if !declare.nowait {
                self.send_method(connection, channel_no, ExchangeMethod::DeclareOk);
            }
            return Ok(());
        }

        if declare.passive {
            return Err(AmqpException::not_found(format!(
                "NOT_FOUND - no exchange '{}'",
                declare.exchange
            )));
        }
        if declare.exchange.is_empty() || declare.exchange.starts_with(RESERVED_PREFIX) {
            return Err(AmqpException::access_refused(format!(
                "ACCESS_REFUSED - exchange name '{}' is reserved",
                declare.exchange
            )));
        }
        let kind = ExchangeKind::parse(&declare.kind).ok_or_else(|| {
            AmqpException::command_invalid(format!(
                "COMMAND_INVALID - unknown exchange type '{}'",
                declare.kind
            ))
        })?;

        let exchange = Exchange {
            name: declare.exchange.clone(),
            kind,
            durable: declare.durable,
            auto_delete: declare.auto_delete,
            internal: declare.internal,
            arguments: declare.arguments,
            is_default: false,
        };
        debug!(exchange = %exchange.name, kind = exchange.kind.as_str(),
               durable = exchange.durable, "exchange declared");
        self.exchanges.insert(declare.exchange.clone(), exchange);
        if declare.durable {
            self.persistence.save_exchanges(&self.exchanges).await?;
        }
        self.events.emit(BrokerEvent::ExchangeCreated {
            name: declare.exchange,
        });
        if !declare.nowait {
            self.send_method(connection, channel_no, ExchangeMethod::DeclareOk);
        }
        Ok(())
    }

    async fn on_exchange_delete(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        delete: Delete,
    ) -> Result<(), AmqpException> {
        if delete.exchange.is_empty()
            || self
                .exchanges
                .get(&delete.exchange)
                .is_some_and(|e| e.is_default)
        {
            return Err(AmqpException::access_refused(
                "ACCESS_REFUSED - cannot delete a default exchange",
            ));
        }

        let Some(exchange) = self.exchanges.get(&delete.exchange) else {
            // deleting what does not exist is a success
            if !delete.nowait {
                self.send_method(connection, channel_no, ExchangeMethod::DeleteOk);
            }
            return Ok(());
        };

        let in_use = self.bindings.iter().any(|b| b.source == delete.exchange);
        if delete.if_unused && in_use {
            return Err(AmqpException::precondition_failed(format!(
                "PRECONDITION_FAILED - exchange '{}' still has bindings",
                delete.exchange
            )));
        }
        let was_durable = exchange.durable;

        let removed: Vec<Binding> = {
            let (kept, removed): (Vec<Binding>, Vec<Binding>) = std::mem::take(&mut self.bindings)
                .into_iter()
                .partition(|b| b.source != delete.exchange);
            self.bindings = kept;
            removed
        };
        let dropped_durable_binding = removed
            .iter()
            .any(|b| self.queues.get(&b.destination).is_some_and(|q| q.durable));
        for binding in removed {
            self.events.emit(BrokerEvent::BindingDeleted {
                source: binding.source,
                destination: binding.destination,
                routing_key: binding.routing_key,
            });
        }

        self.exchanges.shift_remove(&delete.exchange);
        if was_durable {
            self.persistence.save_exchanges(&self.exchanges).await?;
        }
        if dropped_durable_binding {
            self.persistence
                .save_bindings(&self.bindings, &self.queues)
                .await?;
        }
        debug!(exchange = %delete.exchange, "exchange deleted");
        self.events.emit(BrokerEvent::ExchangeDeleted {
            name: delete.exchange,
        });
        if !delete.nowait {
            self.send_method(connection, channel_no, ExchangeMethod::DeleteOk);
        }
        Ok(())
    }
}
