//! Connection-class methods (class id 10)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::field_table::FieldTable;
use crate::util::{
    get_long_bytes, get_long_str, get_short_str, get_u16, get_u32, get_u8, put_long_bytes,
    put_long_str, put_short_str,
};

pub(crate) const START: u16 = 10;
pub(crate) const START_OK: u16 = 11;
pub(crate) const TUNE: u16 = 30;
pub(crate) const TUNE_OK: u16 = 31;
pub(crate) const OPEN: u16 = 40;
pub(crate) const OPEN_OK: u16 = 41;
pub(crate) const CLOSE: u16 = 50;
pub(crate) const CLOSE_OK: u16 = 51;

/// Methods of the connection class
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionMethod {
    /// Server greeting opening the handshake
    Start(Start),
    /// Client reply carrying credentials
    StartOk(StartOk),
    /// Server limits proposal
    Tune(Tune),
    /// Client limits confirmation
    TuneOk(TuneOk),
    /// Client virtual host selection
    Open(Open),
    /// Server virtual host acceptance
    OpenOk(OpenOk),
    /// Orderly close request from either peer
    Close(Close),
    /// Close confirmation
    CloseOk,
}

impl ConnectionMethod {
    pub(crate) fn method_id(&self) -> u16 {
        match self {
            ConnectionMethod::Start(_) => START,
            ConnectionMethod::StartOk(_) => START_OK,
            ConnectionMethod::Tune(_) => TUNE,
            ConnectionMethod::TuneOk(_) => TUNE_OK,
            ConnectionMethod::Open(_) => OPEN,
            ConnectionMethod::OpenOk(_) => OPEN_OK,
            ConnectionMethod::Close(_) => CLOSE,
            ConnectionMethod::CloseOk => CLOSE_OK,
        }
    }

    pub(crate) fn encode_args(&self, dst: &mut BytesMut) {
        match self {
            ConnectionMethod::Start(m) => m.encode(dst),
            ConnectionMethod::StartOk(m) => m.encode(dst),
            ConnectionMethod::Tune(m) => m.encode(dst),
            ConnectionMethod::TuneOk(m) => m.encode(dst),
            ConnectionMethod::Open(m) => m.encode(dst),
            ConnectionMethod::OpenOk(m) => m.encode(dst),
            ConnectionMethod::Close(m) => m.encode(dst),
            ConnectionMethod::CloseOk => {}
        }
    }

    pub(crate) fn decode_args(method_id: u16, src: &mut Bytes) -> Result<Self, Error> {
        let method = match method_id {
            START => ConnectionMethod::Start(Start::decode(src)?),
            START_OK => ConnectionMethod::StartOk(StartOk::decode(src)?),
            TUNE => ConnectionMethod::Tune(Tune::decode(src)?),
            TUNE_OK => ConnectionMethod::TuneOk(TuneOk::decode(src)?),
            OPEN => ConnectionMethod::Open(Open::decode(src)?),
            OPEN_OK => ConnectionMethod::OpenOk(OpenOk::decode(src)?),
            CLOSE => ConnectionMethod::Close(Close::decode(src)?),
            CLOSE_OK => ConnectionMethod::CloseOk,
            other => {
                return Err(Error::UnknownMethod {
                    class_id: crate::constants::class_id::CONNECTION,
                    method_id: other,
                })
            }
        };
        Ok(method)
    }
}

/// Connection.Start
#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    /// Protocol major version, 0
    pub version_major: u8,
    /// Protocol minor version, 9
    pub version_minor: u8,
    /// Server identity and capabilities
    pub server_properties: FieldTable,
    /// Space-separated SASL mechanisms
    pub mechanisms: String,
    /// Space-separated locales
    pub locales: String,
}

impl Start {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.version_major);
        dst.put_u8(self.version_minor);
        self.server_properties.encode(dst);
        put_long_str(dst, &self.mechanisms);
        put_long_str(dst, &self.locales);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            version_major: get_u8(src, "version-major")?,
            version_minor: get_u8(src, "version-minor")?,
            server_properties: FieldTable::decode(src)?,
            mechanisms: get_long_str(src, "mechanisms")?,
            locales: get_long_str(src, "locales")?,
        })
    }
}

/// Connection.Start-Ok
#[derive(Debug, Clone, PartialEq)]
pub struct StartOk {
    /// Client identity and capabilities
    pub client_properties: FieldTable,
    /// Chosen SASL mechanism
    pub mechanism: String,
    /// Opaque mechanism response; PLAIN is `\0user\0pass`, AMQPLAIN a bare
    /// field-table entry sequence
    pub response: Bytes,
    /// Chosen locale
    pub locale: String,
}

impl StartOk {
    fn encode(&self, dst: &mut BytesMut) {
        self.client_properties.encode(dst);
        put_short_str(dst, &self.mechanism);
        put_long_bytes(dst, &self.response);
        put_short_str(dst, &self.locale);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            client_properties: FieldTable::decode(src)?,
            mechanism: get_short_str(src, "mechanism")?,
            response: get_long_bytes(src, "mechanism response")?,
            locale: get_short_str(src, "locale")?,
        })
    }
}

/// Connection.Tune
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tune {
    /// Highest channel number the server will accept, 0 meaning no limit
    pub channel_max: u16,
    /// Largest frame the server will accept, 0 meaning no limit
    pub frame_max: u32,
    /// Heartbeat period in seconds, 0 disabling heartbeats
    pub heartbeat: u16,
}

impl Tune {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.channel_max);
        dst.put_u32(self.frame_max);
        dst.put_u16(self.heartbeat);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            channel_max: get_u16(src, "channel-max")?,
            frame_max: get_u32(src, "frame-max")?,
            heartbeat: get_u16(src, "heartbeat")?,
        })
    }
}

/// Connection.Tune-Ok, same shape as Tune
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneOk {
    /// Highest channel number the client will use
    pub channel_max: u16,
    /// Largest frame the client will accept
    pub frame_max: u32,
    /// Heartbeat period the client wants
    pub heartbeat: u16,
}

impl TuneOk {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.channel_max);
        dst.put_u32(self.frame_max);
        dst.put_u16(self.heartbeat);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            channel_max: get_u16(src, "channel-max")?,
            frame_max: get_u32(src, "frame-max")?,
            heartbeat: get_u16(src, "heartbeat")?,
        })
    }
}

/// Connection.Open
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    /// Virtual host to open
    pub virtual_host: String,
    /// Reserved (capabilities)
    pub capabilities: String,
    /// Reserved (insist)
    pub insist: bool,
}

impl Open {
    fn encode(&self, dst: &mut BytesMut) {
        put_short_str(dst, &self.virtual_host);
        put_short_str(dst, &self.capabilities);
        dst.put_u8(self.insist as u8);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            virtual_host: get_short_str(src, "virtual-host")?,
            capabilities: get_short_str(src, "capabilities")?,
            insist: get_u8(src, "insist")? & 0b1 != 0,
        })
    }
}

/// Connection.Open-Ok
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOk {
    /// Reserved (known-hosts)
    pub known_hosts: String,
}

impl OpenOk {
    fn encode(&self, dst: &mut BytesMut) {
        put_short_str(dst, &self.known_hosts);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            known_hosts: get_short_str(src, "known-hosts")?,
        })
    }
}

/// Connection.Close
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

impl Close {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.reply_code);
        put_short_str(dst, &self.reply_text);
        dst.put_u16(self.class_id);
        dst.put_u16(self.method_id);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            reply_code: get_u16(src, "reply-code")?,
            reply_text: get_short_str(src, "reply-text")?,
            class_id: get_u16(src, "class-id")?,
            method_id: get_u16(src, "method-id")?,
        })
    }
}
