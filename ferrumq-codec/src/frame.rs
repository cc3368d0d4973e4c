//! Frame type and the corresponding encoder and decoder
//!
//! On-wire layout: type (u8), channel (u16), payload size (u32), payload,
//! end marker 0xCE. The decoder waits for a whole frame before parsing the
//! payload, so payload decoders never see a partial buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{
    DEFAULT_FRAME_MAX, FRAME_BODY, FRAME_END, FRAME_HEADER, FRAME_HEARTBEAT, FRAME_METHOD,
    FRAME_OVERHEAD,
};
use crate::error::Error;
use crate::methods::Method;
use crate::properties::ContentHeader;

/// A single AMQP frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the frame belongs to; 0 for connection-scoped frames
    pub channel: u16,
    /// Typed frame payload
    pub payload: FramePayload,
}

/// Payload of a frame, discriminated by the frame type byte
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A method and its arguments
    Method(Method),
    /// A content header announcing body size and properties
    Header(ContentHeader),
    /// A slice of content body
    Body(Bytes),
    /// A heartbeat; always on channel 0
    Heartbeat,
}

impl Frame {
    /// Creates a method frame
    pub fn method(channel: u16, method: impl Into<Method>) -> Self {
        Self {
            channel,
            payload: FramePayload::Method(method.into()),
        }
    }

    /// Creates a content header frame
    pub fn header(channel: u16, header: ContentHeader) -> Self {
        Self {
            channel,
            payload: FramePayload::Header(header),
        }
    }

    /// Creates a content body frame
    pub fn body(channel: u16, body: Bytes) -> Self {
        Self {
            channel,
            payload: FramePayload::Body(body),
        }
    }

    /// Creates a heartbeat frame
    pub fn heartbeat() -> Self {
        Self {
            channel: 0,
            payload: FramePayload::Heartbeat,
        }
    }
}

/// Encoder and decoder of AMQP frames
///
/// `max_frame_size` bounds the total on-wire size of a decoded frame; it is
/// raised or lowered after `Tune-Ok` to the negotiated value.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec with the given maximum total frame size
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Updates the maximum frame size after tune negotiation
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_MAX as usize)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (frame_type, payload) = match item.payload {
            FramePayload::Method(method) => {
                let mut buf = BytesMut::new();
                method.encode(&mut buf);
                (FRAME_METHOD, buf.freeze())
            }
            FramePayload::Header(header) => {
                let mut buf = BytesMut::new();
                header.encode(&mut buf);
                (FRAME_HEADER, buf.freeze())
            }
            FramePayload::Body(body) => (FRAME_BODY, body),
            FramePayload::Heartbeat => (FRAME_HEARTBEAT, Bytes::new()),
        };

        dst.reserve(FRAME_OVERHEAD + payload.len());
        dst.put_u8(frame_type);
        dst.put_u16(item.channel);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        dst.put_u8(FRAME_END);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // type + channel + size
        if src.len() < 7 {
            return Ok(None);
        }

        let payload_size = u32::from_be_bytes([src[3], src[4], src[5], src[6]]) as usize;
        let total = FRAME_OVERHEAD + payload_size;
        if total > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let frame_type = frame.get_u8();
        let channel = frame.get_u16();
        let _size = frame.get_u32();
        let mut payload = frame.split_to(payload_size).freeze();
        if frame.get_u8() != FRAME_END {
            return Err(Error::FrameEnd);
        }

        let payload = match frame_type {
            FRAME_METHOD => FramePayload::Method(Method::decode(&mut payload)?),
            FRAME_HEADER => FramePayload::Header(ContentHeader::decode(&mut payload)?),
            FRAME_BODY => FramePayload::Body(payload),
            FRAME_HEARTBEAT => FramePayload::Heartbeat,
            other => return Err(Error::UnknownFrameType(other)),
        };

        Ok(Some(Frame { channel, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::{BasicMethod, ConnectionMethod};
    use crate::methods::{basic, connection};
    use crate::properties::BasicProperties;

    fn roundtrip(frame: Frame) -> Frame {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decoder left bytes behind");
        decoded
    }

    #[test]
    fn heartbeat_frame_is_eight_bytes() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Frame::heartbeat(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn method_frame_roundtrip() {
        let frame = Frame::method(
            1,
            ConnectionMethod::Close(connection::Close {
                reply_code: 320,
                reply_text: "CONNECTION_FORCED".into(),
                class_id: 0,
                method_id: 0,
            }),
        );
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn header_and_body_roundtrip() {
        let props = BasicProperties {
            delivery_mode: Some(2),
            ..Default::default()
        };
        let header = Frame::header(3, ContentHeader::basic(5, props));
        assert_eq!(roundtrip(header.clone()), header);

        let body = Frame::body(3, Bytes::from_static(b"hello"));
        assert_eq!(roundtrip(body.clone()), body);
    }

    #[test]
    fn partial_input_yields_none() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame::method(
                    0,
                    BasicMethod::Ack(basic::Ack {
                        delivery_tag: 1,
                        multiple: false,
                    }),
                ),
                &mut buf,
            )
            .unwrap();

        let mut partial = BytesMut::from(&buf[..buf.len() - 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn bad_end_marker_is_a_frame_error() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Frame::heartbeat(), &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] = 0x00;
        assert!(matches!(codec.decode(&mut buf), Err(Error::FrameEnd)));
    }

    #[test]
    fn oversize_frame_is_rejected_before_buffering() {
        let mut codec = FrameCodec::new(64);
        // claims a 1 MiB payload
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0x10, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn two_frames_in_one_buffer_decode_in_order() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Frame::heartbeat(), &mut buf).unwrap();
        codec
            .encode(Frame::body(7, Bytes::from_static(b"x")), &mut buf)
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Frame::heartbeat());
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.channel, 7);
    }
}
