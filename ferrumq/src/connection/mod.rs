//! Connection-level types: handshake states, tune negotiation, credentials

mod engine;
mod heartbeat;

use bytes::Bytes;
use ferrumq_codec::constants::{DEFAULT_CHANNEL_MAX, DEFAULT_FRAME_MAX, DEFAULT_HEARTBEAT};
use ferrumq_codec::methods::connection::{Tune, TuneOk};
use ferrumq_codec::{FieldTable, FieldValue};

pub(crate) use engine::{run_connection, EngineConfig};

/// Connection lifecycle; the `Awaiting*` states cover the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    AwaitingHeader,
    AwaitingStartOk,
    AwaitingTuneOk,
    AwaitingOpen,
    Open,
    Closing,
    #[allow(dead_code)]
    Closed,
}

/// Limits negotiated during the tune exchange
#[derive(Debug, Clone, Copy)]
pub(crate) struct TuneParams {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Default for TuneParams {
    fn default() -> Self {
        Self {
            channel_max: DEFAULT_CHANNEL_MAX,
            frame_max: DEFAULT_FRAME_MAX,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

impl TuneParams {
    /// Proposal sent in `Connection.Tune`
    pub(crate) fn proposal(&self) -> Tune {
        Tune {
            channel_max: self.channel_max,
            frame_max: self.frame_max,
            heartbeat: self.heartbeat,
        }
    }

    /// Applies the client's `Tune-Ok`: a client value of zero defers to the
    /// server, otherwise the lower of the two wins
    pub(crate) fn negotiate(&self, client: TuneOk) -> Self {
        fn pick_u16(client: u16, server: u16) -> u16 {
            if client == 0 {
                server
            } else {
                client.min(server)
            }
        }
        fn pick_u32(client: u32, server: u32) -> u32 {
            if client == 0 {
                server
            } else {
                client.min(server)
            }
        }
        Self {
            channel_max: pick_u16(client.channel_max, self.channel_max),
            frame_max: pick_u32(client.frame_max, self.frame_max),
            heartbeat: pick_u16(client.heartbeat, self.heartbeat),
        }
    }
}

/// Credentials extracted from the `Start-Ok` mechanism response
#[derive(Debug, Clone)]
pub(crate) struct Credentials {
    pub username: String,
    #[allow(dead_code)]
    pub password: String,
}

impl Credentials {
    /// Parses a PLAIN (`\0user\0pass`) or AMQPLAIN (bare field table with
    /// `LOGIN`/`PASSWORD`) response. Any well-formed pair is accepted; this
    /// broker validates shape, not identity.
    pub(crate) fn parse(mechanism: &str, response: &Bytes) -> Option<Self> {
        match mechanism {
            "PLAIN" => {
                let mut parts = response.split(|b| *b == 0);
                let _authzid = parts.next()?;
                let username = String::from_utf8(parts.next()?.to_vec()).ok()?;
                let password = String::from_utf8(parts.next()?.to_vec()).ok()?;
                if username.is_empty() {
                    return None;
                }
                Some(Self { username, password })
            }
            "AMQPLAIN" => {
                let mut raw = response.clone();
                let table = FieldTable::decode_inner(&mut raw).ok()?;
                let username = match table.get("LOGIN")? {
                    FieldValue::Str(s) => s.clone(),
                    _ => return None,
                };
                let password = match table.get("PASSWORD")? {
                    FieldValue::Str(s) => s.clone(),
                    _ => return None,
                };
                Some(Self { username, password })
            }
            _ => None,
        }
    }
}

/// SASL mechanisms advertised in `Connection.Start`
pub(crate) const MECHANISMS: &str = "PLAIN AMQPLAIN";

/// Locales advertised in `Connection.Start`
pub(crate) const LOCALES: &str = "en_US";

/// The identity table advertised in `Connection.Start`
pub(crate) fn server_properties() -> FieldTable {
    let mut capabilities = FieldTable::new();
    capabilities.insert("publisher_confirms", FieldValue::Bool(false));
    capabilities.insert("basic.nack", FieldValue::Bool(true));
    capabilities.insert("consumer_cancel_notify", FieldValue::Bool(true));
    capabilities.insert("per_consumer_qos", FieldValue::Bool(true));
    capabilities.insert("authentication_failure_close", FieldValue::Bool(true));
    capabilities.insert("exchange_exchange_bindings", FieldValue::Bool(false));

    let mut properties = FieldTable::new();
    properties.insert("product", FieldValue::Str(env!("CARGO_PKG_NAME").into()));
    properties.insert("version", FieldValue::Str(env!("CARGO_PKG_VERSION").into()));
    properties.insert("platform", FieldValue::Str("Rust".into()));
    properties.insert("capabilities", FieldValue::Table(capabilities));
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_client_values_defer_to_the_server() {
        let server = TuneParams::default();
        let negotiated = server.negotiate(TuneOk {
            channel_max: 0,
            frame_max: 0,
            heartbeat: 0,
        });
        assert_eq!(negotiated.channel_max, server.channel_max);
        assert_eq!(negotiated.frame_max, server.frame_max);
        assert_eq!(negotiated.heartbeat, server.heartbeat);
    }

    #[test]
    fn lower_of_client_and_server_wins() {
        let server = TuneParams::default();
        let negotiated = server.negotiate(TuneOk {
            channel_max: 15,
            frame_max: 4096,
            heartbeat: 600,
        });
        assert_eq!(negotiated.channel_max, 15);
        assert_eq!(negotiated.frame_max, 4096);
        assert_eq!(negotiated.heartbeat, TuneParams::default().heartbeat);
    }

    #[test]
    fn plain_credentials_parse() {
        let creds = Credentials::parse("PLAIN", &Bytes::from_static(b"\0guest\0secret")).unwrap();
        assert_eq!(creds.username, "guest");
        assert_eq!(creds.password, "secret");
        assert!(Credentials::parse("PLAIN", &Bytes::from_static(b"garbage")).is_none());
    }

    #[test]
    fn amqplain_credentials_parse() {
        use bytes::{BufMut, BytesMut};
        let mut buf = BytesMut::new();
        for (key, value) in [("LOGIN", "guest"), ("PASSWORD", "secret")] {
            buf.put_u8(key.len() as u8);
            buf.put_slice(key.as_bytes());
            buf.put_u8(b'S');
            buf.put_u32(value.len() as u32);
            buf.put_slice(value.as_bytes());
        }
        let creds = Credentials::parse("AMQPLAIN", &buf.freeze()).unwrap();
        assert_eq!(creds.username, "guest");
        assert!(Credentials::parse("AMQPLAIN", &Bytes::from_static(b"\x01")).is_none());
    }

    #[test]
    fn unknown_mechanism_is_rejected() {
        assert!(Credentials::parse("EXTERNAL", &Bytes::new()).is_none());
    }
}
