//! Implements the protocol header exchanged before any frame
//!
//! Every connection opens with the client writing the 8-byte preamble
//! `AMQP\x00\x00\x09\x01`. A server receiving anything else writes its own
//! header back and closes the socket without a reply sequence.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

const PROTOCOL_HEADER_PREFIX: &[u8; 4] = b"AMQP";

/// Protocol version carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Major version, 0
    pub major: u8,
    /// Minor version, 9
    pub minor: u8,
    /// Revision, 1
    pub revision: u8,
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self {
            major: 0,
            minor: 9,
            revision: 1,
        }
    }
}

impl ProtocolHeader {
    /// The 0-9-1 header this broker speaks
    pub fn amqp_0_9_1() -> Self {
        Self::default()
    }
}

impl From<ProtocolHeader> for [u8; 8] {
    fn from(value: ProtocolHeader) -> Self {
        [
            PROTOCOL_HEADER_PREFIX[0], // b'A'
            PROTOCOL_HEADER_PREFIX[1], // b'M'
            PROTOCOL_HEADER_PREFIX[2], // b'Q'
            PROTOCOL_HEADER_PREFIX[3], // b'P'
            0,
            value.major,
            value.minor,
            value.revision,
        ]
    }
}

impl TryFrom<[u8; 8]> for ProtocolHeader {
    type Error = [u8; 8];

    fn try_from(v: [u8; 8]) -> Result<Self, Self::Error> {
        if &v[..4] != PROTOCOL_HEADER_PREFIX || v[4] != 0 {
            return Err(v);
        }
        Ok(Self {
            major: v[5],
            minor: v[6],
            revision: v[7],
        })
    }
}

/// Encoder and decoder for the protocol header exchange
///
/// Used only for the first 8 bytes of a connection; the transport swaps it
/// for [`crate::frame::FrameCodec`] once negotiation succeeds.
#[derive(Debug, Default)]
pub struct ProtocolHeaderCodec {}

impl Encoder<ProtocolHeader> for ProtocolHeaderCodec {
    type Error = Error;

    fn encode(&mut self, item: ProtocolHeader, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes: [u8; 8] = item.into();
        dst.reserve(8);
        dst.put_slice(&bytes);
        Ok(())
    }
}

impl Decoder for ProtocolHeaderCodec {
    type Item = ProtocolHeader;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 8 {
            return Ok(None);
        }
        let mut raw = [0u8; 8];
        src.copy_to_slice(&mut raw);
        ProtocolHeader::try_from(raw).map(Some).map_err(Error::ProtocolHeaderMismatch)
    }
}
