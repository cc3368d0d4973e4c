//! Channel-class method handlers

use ferrumq_codec::methods::channel::{self, Flow, FlowOk, OpenOk};
use ferrumq_codec::ChannelMethod;
use tracing::debug;

use crate::broker::core::BrokerCore;
use crate::channel::Channel;
use crate::entities::ConnectionId;
use crate::error::AmqpException;
use crate::events::BrokerEvent;

impl BrokerCore {
    /// `Channel.Open`: a channel springs into existence fully open
    pub(crate) async fn on_channel_open(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
    ) -> Result<(), AmqpException> {
        let entry = self.entry_mut(connection)?;
        if channel_no == 0 || channel_no > entry.tune.channel_max {
            return Err(AmqpException::command_invalid(format!(
                "COMMAND_INVALID - channel {channel_no} outside the negotiated range 1..={}",
                entry.tune.channel_max
            )));
        }
        if entry.channels.contains_key(&channel_no) {
            return Err(AmqpException::channel_error(format!(
                "CHANNEL_ERROR - channel {channel_no} is already open"
            )));
        }
        entry.channels.insert(channel_no, Channel::new(channel_no));
        debug!(connection = %connection, channel = channel_no, "channel open");

        self.send_method(
            connection,
            channel_no,
            ChannelMethod::OpenOk(OpenOk::default()),
        );
        self.events.emit(BrokerEvent::ChannelOpen {
            connection,
            channel: channel_no,
        });
        Ok(())
    }

    pub(crate) async fn on_channel_method(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        method: ChannelMethod,
    ) -> Result<(), AmqpException> {
        match method {
            ChannelMethod::Flow(Flow { active }) => {
                self.on_channel_flow(connection, channel_no, active).await
            }
            ChannelMethod::Close(close) => {
                self.on_channel_close(connection, channel_no, close).await
            }
            // reply to a server-initiated Flow; nothing to update beyond
            // what Flow itself already set
            ChannelMethod::FlowOk(_) => Ok(()),
            // Open and Close-Ok are intercepted by the dispatcher
            ChannelMethod::Open(_) | ChannelMethod::OpenOk(_) | ChannelMethod::CloseOk => {
                Err(AmqpException::command_invalid(
                    "COMMAND_INVALID - unexpected channel method",
                ))
            }
        }
    }

    /// `Channel.Flow`: suspends or resumes deliveries; acks and method
    /// calls keep working either way
    async fn on_channel_flow(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        active: bool,
    ) -> Result<(), AmqpException> {
        let channel = self.channel_mut(connection, channel_no)?;
        channel.flow_active = active;
        self.send_method(connection, channel_no, ChannelMethod::FlowOk(FlowOk { active }));
        self.events.emit(BrokerEvent::ChannelFlow {
            connection,
            channel: channel_no,
            active,
        });
        if active {
            // suspended deliveries may be waiting on every queue this
            // channel consumes from
            self.dispatch_channel_queues(connection, channel_no).await?;
        }
        Ok(())
    }

    /// Client-initiated `Channel.Close`: requeue unacked deliveries, cancel
    /// consumers, confirm, and forget the channel
    async fn on_channel_close(
        &mut self,
        connection: ConnectionId,
        channel_no: u16,
        close: channel::Close,
    ) -> Result<(), AmqpException> {
        debug!(connection = %connection, channel = channel_no, code = close.reply_code,
               text = %close.reply_text, "client closing channel");
        self.teardown_channel_resources(connection, channel_no).await;
        if let Some(entry) = self.connections.get_mut(&connection) {
            entry.channels.remove(&channel_no);
        }
        self.send_method(connection, channel_no, ChannelMethod::CloseOk);
        self.events.emit(BrokerEvent::ChannelClose {
            connection,
            channel: channel_no,
        });
        Ok(())
    }
}
