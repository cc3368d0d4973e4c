//! Exchange-class methods (class id 40)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::field_table::FieldTable;
use crate::util::{get_short_str, get_u16, get_u8, put_short_str};

pub(crate) const DECLARE: u16 = 10;
pub(crate) const DECLARE_OK: u16 = 11;
pub(crate) const DELETE: u16 = 20;
pub(crate) const DELETE_OK: u16 = 21;

/// Methods of the exchange class
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeMethod {
    /// Create an exchange or assert an existing one
    Declare(Declare),
    /// Declare confirmed
    DeclareOk,
    /// Delete an exchange
    Delete(Delete),
    /// Delete confirmed
    DeleteOk,
}

impl ExchangeMethod {
    pub(crate) fn method_id(&self) -> u16 {
        match self {
            ExchangeMethod::Declare(_) => DECLARE,
            ExchangeMethod::DeclareOk => DECLARE_OK,
            ExchangeMethod::Delete(_) => DELETE,
            ExchangeMethod::DeleteOk => DELETE_OK,
        }
    }

    pub(crate) fn encode_args(&self, dst: &mut BytesMut) {
        match self {
            ExchangeMethod::Declare(m) => m.encode(dst),
            ExchangeMethod::DeclareOk => {}
            ExchangeMethod::Delete(m) => m.encode(dst),
            ExchangeMethod::DeleteOk => {}
        }
    }

    pub(crate) fn decode_args(method_id: u16, src: &mut Bytes) -> Result<Self, Error> {
        let method = match method_id {
            DECLARE => ExchangeMethod::Declare(Declare::decode(src)?),
            DECLARE_OK => ExchangeMethod::DeclareOk,
            DELETE => ExchangeMethod::Delete(Delete::decode(src)?),
            DELETE_OK => ExchangeMethod::DeleteOk,
            other => {
                return Err(Error::UnknownMethod {
                    class_id: crate::constants::class_id::EXCHANGE,
                    method_id: other,
                })
            }
        };
        Ok(method)
    }
}

/// Exchange.Declare
#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    /// Exchange name
    pub exchange: String,
    /// Exchange type: direct, fanout, topic, or headers
    pub kind: String,
    /// Assert existence without creating
    pub passive: bool,
    /// Survive broker restart
    pub durable: bool,
    /// Delete when the last binding is removed
    pub auto_delete: bool,
    /// Refuse publishes from clients
    pub internal: bool,
    /// Suppress the reply frame
    pub nowait: bool,
    /// Declaration arguments
    pub arguments: FieldTable,
}

impl Declare {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.exchange);
        put_short_str(dst, &self.kind);
        let mut bits = 0u8;
        bits |= self.passive as u8;
        bits |= (self.durable as u8) << 1;
        bits |= (self.auto_delete as u8) << 2;
        bits |= (self.internal as u8) << 3;
        bits |= (self.nowait as u8) << 4;
        dst.put_u8(bits);
        self.arguments.encode(dst);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        let exchange = get_short_str(src, "exchange")?;
        let kind = get_short_str(src, "exchange type")?;
        let bits = get_u8(src, "declare flags")?;
        Ok(Self {
            exchange,
            kind,
            passive: bits & 0b0000_0001 != 0,
            durable: bits & 0b0000_0010 != 0,
            auto_delete: bits & 0b0000_0100 != 0,
            internal: bits & 0b0000_1000 != 0,
            nowait: bits & 0b0001_0000 != 0,
            arguments: FieldTable::decode(src)?,
        })
    }
}

/// Exchange.Delete
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Exchange name
    pub exchange: String,
    /// Fail if bindings still reference the exchange
    pub if_unused: bool,
    /// Suppress the reply frame
    pub nowait: bool,
}

impl Delete {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(0); // reserved (ticket)
        put_short_str(dst, &self.exchange);
        let mut bits = 0u8;
        bits |= self.if_unused as u8;
        bits |= (self.nowait as u8) << 1;
        dst.put_u8(bits);
    }

    fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let _ticket = get_u16(src, "reserved ticket")?;
        let exchange = get_short_str(src, "exchange")?;
        let bits = get_u8(src, "delete flags")?;
        Ok(Self {
            exchange,
            if_unused: bits & 0b01 != 0,
            nowait: bits & 0b10 != 0,
        })
    }
}
