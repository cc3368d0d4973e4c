//! Method dispatch: frames in, entity effects and reply frames out
//!
//! One submodule per method class, mirroring the codec. Every handler
//! returns `Result<(), AmqpException>`; the core turns exceptions into the
//! matching close sequence. Handlers never suspend between receiving a
//! method and queueing its reply, which keeps per-channel request-reply
//! ordering.

mod basic;
mod channel;
mod exchange;
mod queue;

use bytes::Bytes;
use ferrumq_codec::{ChannelMethod, ContentHeader, Frame, FramePayload, Method};

use crate::broker::core::{BrokerCore, ConnectionEntry};
use crate::channel::{Channel, ChannelState};
use crate::entities::ConnectionId;
use crate::error::AmqpException;
use crate::events::BrokerEvent;

impl BrokerCore {
    /// Entry point for every post-handshake frame on a non-zero channel
    pub(crate) async fn on_channel_frame(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        frame: Frame,
    ) -> Result<(), AmqpException> {
        match frame.payload {
            FramePayload::Method(method) => {
                let class_id = method.class_id();
                let method_id = method.method_id();
                self.on_method(connection, channel_no, method)
                    .await
                    .map_err(|exception| exception.with_method(class_id, method_id))
            }
            FramePayload::Header(header) => {
                self.on_content_header(connection, channel_no, header).await
            }
            FramePayload::Body(body) => self.on_content_body(connection, channel_no, body).await,
            FramePayload::Heartbeat => Err(AmqpException::command_invalid(
                "COMMAND_INVALID - heartbeat on a non-zero channel",
            )),
        }
    }

    async fn on_method(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        method: Method,
    ) -> Result<(), AmqpException> {
        let channel_state = self
            .connections
            .get(&connection)
            .and_then(|entry| entry.channels.get(&channel_no))
            .map(|channel| channel.state);

        // lifecycle methods come before the per-class dispatch
        if let Method::Channel(ChannelMethod::Open(_)) = &method {
            return self.on_channel_open(connection, channel_no).await;
        }
        match channel_state {
            Some(ChannelState::Closing) => {
                // draining toward Close-Ok; everything else is dropped
                if let Method::Channel(ChannelMethod::CloseOk) = &method {
                    if let Some(entry) = self.connections.get_mut(&connection) {
                        entry.channels.remove(&channel_no);
                    }
                    self.events.emit(BrokerEvent::ChannelClose {
                        connection,
                        channel: channel_no,
                    });
                }
                return Ok(());
            }
            None => {
                return Err(AmqpException::channel_error(format!(
                    "CHANNEL_ERROR - channel {channel_no} is not open"
                )));
            }
            Some(_) => {}
        }

        // a channel assembling a publish accepts only content frames
        if self.channel_is_assembling(connection, channel_no)
            && !matches!(&method, Method::Channel(ChannelMethod::Close(_)))
        {
            return Err(AmqpException::unexpected_frame(
                "UNEXPECTED_FRAME - expected content header or body",
            ));
        }

        match method {
            Method::Connection(_) => Err(AmqpException::command_invalid(
                "COMMAND_INVALID - connection method on a non-zero channel",
            )),
            Method::Channel(m) => self.on_channel_method(connection, channel_no, m).await,
            Method::Exchange(m) => self.on_exchange_method(connection, channel_no, m).await,
            Method::Queue(m) => self.on_queue_method(connection, channel_no, m).await,
            Method::Basic(m) => self.on_basic_method(connection, channel_no, m).await,
        }
    }

    async fn on_content_header(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        header: ContentHeader,
    ) -> Result<(), AmqpException> {
        let channel = self.channel_mut(connection, channel_no)?;
        if channel.state == ChannelState::Closing {
            // content racing a close in flight; drop it
            return Ok(());
        }
        if let Some(done) = channel.collect_header(header)? {
            self.complete_publish(connection, channel_no, done).await?;
        }
        Ok(())
    }

    async fn on_content_body(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        body: Bytes,
    ) -> Result<(), AmqpException> {
        let channel = self.channel_mut(connection, channel_no)?;
        if channel.state == ChannelState::Closing {
            return Ok(());
        }
        if let Some(done) = channel.collect_body(body)? {
            self.complete_publish(connection, channel_no, done).await?;
        }
        Ok(())
    }

    /* ------------------------------ helpers ------------------------------ */

    pub(crate) fn entry_mut(
        &mut self,
        connection: ConnectionId,
    ) -> Result<&mut ConnectionEntry, AmqpException> {
        self.connections.get_mut(&connection).ok_or_else(|| {
            AmqpException::internal_error("INTERNAL_ERROR - connection is not registered")
        })
    }

    pub(crate) fn channel_mut(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
    ) -> Result<&mut Channel, AmqpException> {
        self.connections
            .get_mut(&connection)
            .and_then(|entry| entry.channels.get_mut(&channel_no))
            .ok_or_else(|| {
                AmqpException::channel_error(format!(
                    "CHANNEL_ERROR - channel {channel_no} is not open"
                ))
            })
    }

    fn channel_is_assembling(&self, connection: ConnectionId, channel_no: u16) -> bool {
        self.connections
            .get(&connection)
            .and_then(|entry| entry.channels.get(&channel_no))
            .is_some_and(|channel| {
                !matches!(channel.assembly, crate::channel::ContentAssembly::Idle)
            })
    }
}
