//! Channel-class methods (class id 20)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::util::{get_long_str, get_short_str, get_u16, get_u8, put_long_str, put_short_str};

pub(crate) const OPEN: u16 = 10;
pub(crate) const OPEN_OK: u16 = 11;
pub(crate) const FLOW: u16 = 20;
pub(crate) const FLOW_OK: u16 = 21;
pub(crate) const CLOSE: u16 = 40;
pub(crate) const CLOSE_OK: u16 = 41;

/// Methods of the channel class
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMethod {
    /// Open a channel on the carrying frame's channel number
    Open(Open),
    /// Channel opened
    OpenOk(OpenOk),
    /// Pause or resume deliveries on the channel
    Flow(Flow),
    /// Flow state acknowledged
    FlowOk(FlowOk),
    /// Close the channel
    Close(Close),
    /// Close confirmed
    CloseOk,
}

impl ChannelMethod {
    pub(crate) fn method_id(&self) -> u16 {
        match self {
            ChannelMethod::Open(_) => OPEN,
            ChannelMethod::OpenOk(_) => OPEN_OK,
            ChannelMethod::Flow(_) => FLOW,
            ChannelMethod::FlowOk(_) => FLOW_OK,
            ChannelMethod::Close(_) => CLOSE,
            ChannelMethod::CloseOk => CLOSE_OK,
        }
    }

    pub(crate) fn encode_args(&self, dst: &mut BytesMut) {
        match self {
            ChannelMethod::Open(m) => put_short_str(dst, &m.out_of_band),
            ChannelMethod::OpenOk(m) => put_long_str(dst, &m.channel_id),
            ChannelMethod::Flow(m) => dst.put_u8(m.active as u8),
            ChannelMethod::FlowOk(m) => dst.put_u8(m.active as u8),
            ChannelMethod::Close(m) => {
                dst.put_u16(m.reply_code);
                put_short_str(dst, &m.reply_text);
                dst.put_u16(m.class_id);
                dst.put_u16(m.method_id);
            }
            ChannelMethod::CloseOk => {}
        }
    }

    pub(crate) fn decode_args(method_id: u16, src: &mut Bytes) -> Result<Self, Error> {
        let method = match method_id {
            OPEN => ChannelMethod::Open(Open {
                out_of_band: get_short_str(src, "out-of-band")?,
            }),
            OPEN_OK => ChannelMethod::OpenOk(OpenOk {
                channel_id: get_long_str(src, "channel-id")?,
            }),
            FLOW => ChannelMethod::Flow(Flow {
                active: get_u8(src, "active")? & 0b1 != 0,
            }),
            FLOW_OK => ChannelMethod::FlowOk(FlowOk {
                active: get_u8(src, "active")? & 0b1 != 0,
            }),
            CLOSE => ChannelMethod::Close(Close {
                reply_code: get_u16(src, "reply-code")?,
                reply_text: get_short_str(src, "reply-text")?,
                class_id: get_u16(src, "class-id")?,
                method_id: get_u16(src, "method-id")?,
            }),
            CLOSE_OK => ChannelMethod::CloseOk,
            other => {
                return Err(Error::UnknownMethod {
                    class_id: crate::constants::class_id::CHANNEL,
                    method_id: other,
                })
            }
        };
        Ok(method)
    }
}

/// Channel.Open
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Open {
    /// Reserved
    pub out_of_band: String,
}

/// Channel.Open-Ok
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOk {
    /// Reserved
    pub channel_id: String,
}

/// Channel.Flow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flow {
    /// True resumes deliveries, false suspends them
    pub active: bool,
}

/// Channel.Flow-Ok
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowOk {
    /// Flow state now in effect
    pub active: bool,
}

/// Channel.Close
#[derive(Debug, Clone, PartialEq)]
pub struct Close {
    /// Reply code describing the close reason
    pub reply_code: u16,
    /// Human-readable close reason
    pub reply_text: String,
    /// Class of the method that caused the close, 0 if none
    pub class_id: u16,
    /// Method that caused the close, 0 if none
    pub method_id: u16,
}
