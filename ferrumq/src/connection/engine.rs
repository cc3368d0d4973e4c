//! Per-connection engine: negotiation, then the socket event loop
//!
//! Each accepted socket gets its own task running [`run_connection`]. The
//! engine owns both halves of the framed transport; the broker core never
//! touches the socket. Post-handshake frames are forwarded to the core over
//! the shared control channel, and frames the core wants written arrive on
//! this connection's outbound queue.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use ferrumq_codec::constants::reply_code;
use ferrumq_codec::methods::connection::{Close, OpenOk, Start};
use ferrumq_codec::{
    ConnectionMethod, FieldTable, Frame, FrameCodec, FramePayload, Method, ProtocolHeader,
    ProtocolHeaderCodec,
};

use crate::broker::control::{BrokerControl, NewConnection};
use crate::connection::heartbeat::HeartBeat;
use crate::connection::{
    server_properties, ConnectionState, Credentials, TuneParams, LOCALES, MECHANISMS,
};
use crate::entities::ConnectionId;

/// Immutable inputs a new connection engine starts from
#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    /// Server-side tune proposal
    pub tune: TuneParams,
    /// Command channel into the broker core
    pub control: mpsc::Sender<BrokerControl>,
}

type FrameRead = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameWrite = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Drives one client connection from accept to socket teardown
pub(crate) async fn run_connection(stream: TcpStream, peer_addr: SocketAddr, config: EngineConfig) {
    let id = Uuid::new_v4();
    let (read_half, write_half) = stream.into_split();
    let header_read = FramedRead::new(read_half, ProtocolHeaderCodec::default());
    let header_write = FramedWrite::new(write_half, ProtocolHeaderCodec::default());

    let mut engine = match negotiate(id, peer_addr, header_read, header_write, &config).await {
        Some(engine) => engine,
        None => {
            debug!(connection = %id, %peer_addr, "connection ended during negotiation");
            return;
        }
    };

    let error = engine.event_loop().await;
    match &error {
        Some(reason) => warn!(connection = %id, %peer_addr, %reason, "connection failed"),
        None => debug!(connection = %id, %peer_addr, "connection closed"),
    }
    let _ = config
        .control
        .send(BrokerControl::Disconnected {
            connection: id,
            error,
        })
        .await;
}

struct ConnectionEngine {
    id: ConnectionId,
    framed_read: FrameRead,
    framed_write: FrameWrite,
    control: mpsc::Sender<BrokerControl>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    heartbeat: HeartBeat,
    /// `None` when the negotiated heartbeat is 0
    heartbeat_period: Option<Duration>,
    last_seen: Instant,
}

/// Runs the server side of the handshake; `None` means the socket is done
/// (refused, failed, or closed by the client) and must simply be dropped.
async fn negotiate(
    id: ConnectionId,
    peer_addr: SocketAddr,
    mut header_read: FramedRead<OwnedReadHalf, ProtocolHeaderCodec>,
    mut header_write: FramedWrite<OwnedWriteHalf, ProtocolHeaderCodec>,
    config: &EngineConfig,
) -> Option<ConnectionEngine> {
    let mut state = ConnectionState::AwaitingHeader;

    match header_read.next().await {
        Some(Ok(header)) if header == ProtocolHeader::amqp_0_9_1() => {
            debug_assert_eq!(state, ConnectionState::AwaitingHeader);
        }
        Some(_) => {
            // not our protocol: answer with the supported header and close
            let _ = header_write.send(ProtocolHeader::amqp_0_9_1()).await;
            return None;
        }
        None => return None,
    }

    let mut framed_read = header_read.map_decoder(|_| FrameCodec::default());
    let mut framed_write = header_write.map_encoder(|_| FrameCodec::default());

    framed_write
        .send(Frame::method(
            0,
            ConnectionMethod::Start(Start {
                version_major: 0,
                version_minor: 9,
                server_properties: server_properties(),
                mechanisms: MECHANISMS.to_string(),
                locales: LOCALES.to_string(),
            }),
        ))
        .await
        .ok()?;
    state = ConnectionState::AwaitingStartOk;

    let mut tune = config.tune;
    let mut client_properties = FieldTable::new();
    let mut username = String::new();

    loop {
        let frame = match framed_read.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                debug!(connection = %id, %err, "frame error during negotiation");
                return None;
            }
            None => return None,
        };
        let method = match (frame.channel, frame.payload) {
            (0, FramePayload::Method(Method::Connection(method))) => method,
            _ => {
                let _ = send_close(
                    &mut framed_write,
                    reply_code::COMMAND_INVALID,
                    "COMMAND_INVALID - unexpected frame during connection negotiation",
                )
                .await;
                return None;
            }
        };

        match (state, method) {
            (ConnectionState::AwaitingStartOk, ConnectionMethod::StartOk(start_ok)) => {
                match Credentials::parse(&start_ok.mechanism, &start_ok.response) {
                    Some(credentials) => username = credentials.username,
                    None => {
                        let _ = send_close(
                            &mut framed_write,
                            reply_code::ACCESS_REFUSED,
                            "ACCESS_REFUSED - malformed credentials",
                        )
                        .await;
                        return None;
                    }
                }
                client_properties = start_ok.client_properties;
                framed_write
                    .send(Frame::method(0, ConnectionMethod::Tune(tune.proposal())))
                    .await
                    .ok()?;
                state = ConnectionState::AwaitingTuneOk;
            }
            (ConnectionState::AwaitingTuneOk, ConnectionMethod::TuneOk(tune_ok)) => {
                tune = tune.negotiate(tune_ok);
                framed_read
                    .decoder_mut()
                    .set_max_frame_size(tune.frame_max as usize);
                state = ConnectionState::AwaitingOpen;
            }
            (ConnectionState::AwaitingOpen, ConnectionMethod::Open(open)) => {
                // any virtual host is accepted in this design
                framed_write
                    .send(Frame::method(
                        0,
                        ConnectionMethod::OpenOk(OpenOk::default()),
                    ))
                    .await
                    .ok()?;
                state = ConnectionState::Open;

                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                config
                    .control
                    .send(BrokerControl::Register(Box::new(NewConnection {
                        id,
                        peer_addr,
                        outbound: outbound_tx,
                        tune,
                        client_properties,
                        virtual_host: open.virtual_host,
                        username,
                    })))
                    .await
                    .ok()?;

                let (heartbeat, heartbeat_period) = match tune.heartbeat {
                    0 => (HeartBeat::never(), None),
                    secs => {
                        let period = Duration::from_secs(secs as u64);
                        (HeartBeat::new(period), Some(period))
                    }
                };
                debug!(connection = %id, %peer_addr, ?state, channel_max = tune.channel_max,
                       frame_max = tune.frame_max, heartbeat = tune.heartbeat, "connection open");

                return Some(ConnectionEngine {
                    id,
                    framed_read,
                    framed_write,
                    control: config.control.clone(),
                    outbound: outbound_rx,
                    heartbeat,
                    heartbeat_period,
                    last_seen: Instant::now(),
                });
            }
            (_, ConnectionMethod::Close(close)) => {
                debug!(connection = %id, code = close.reply_code, "client closed during negotiation");
                let _ = framed_write
                    .send(Frame::method(0, ConnectionMethod::CloseOk))
                    .await;
                return None;
            }
            (_, _) => {
                let _ = send_close(
                    &mut framed_write,
                    reply_code::COMMAND_INVALID,
                    "COMMAND_INVALID - method out of order during connection negotiation",
                )
                .await;
                return None;
            }
        }
    }
}

async fn send_close(
    framed_write: &mut FrameWrite,
    reply_code: u16,
    reply_text: impl Into<String>,
) -> Result<(), ferrumq_codec::Error> {
    framed_write
        .send(Frame::method(
            0,
            ConnectionMethod::Close(Close {
                reply_code,
                reply_text: reply_text.into(),
                class_id: 0,
                method_id: 0,
            }),
        ))
        .await
}

impl ConnectionEngine {
    /// Runs until the socket, the core, or the heartbeat ends the
    /// connection; returns an error description for abnormal ends
    async fn event_loop(&mut self) -> Option<String> {
        loop {
            tokio::select! {
                incoming = self.framed_read.next() => match incoming {
                    Some(Ok(frame)) => {
                        self.last_seen = Instant::now();
                        if let Some(reason) = self.on_frame(frame).await {
                            return Some(reason);
                        }
                    }
                    Some(Err(err)) => {
                        let code = close_code_for(&err);
                        let _ = send_close(
                            &mut self.framed_write,
                            code,
                            format!("connection failed: {err}"),
                        )
                        .await;
                        return Some(err.to_string());
                    }
                    None => return None,
                },
                outgoing = self.outbound.recv() => match outgoing {
                    Some(frame) => {
                        trace!(connection = %self.id, channel = frame.channel, "SEND");
                        if let Err(err) = self.framed_write.send(frame).await {
                            return Some(format!("write failed: {err}"));
                        }
                    }
                    // the core deregistered us; queued frames are drained
                    None => return None,
                },
                Some(()) = self.heartbeat.next() => {
                    if let Some(period) = self.heartbeat_period {
                        if self.last_seen.elapsed() > period * 2 {
                            return Some("heartbeat timed out".to_string());
                        }
                    }
                    if self.framed_write.send(Frame::heartbeat()).await.is_err() {
                        return Some("write failed sending heartbeat".to_string());
                    }
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Option<String> {
        trace!(connection = %self.id, channel = frame.channel, "RECV");
        match frame.payload {
            FramePayload::Heartbeat if frame.channel == 0 => {
                if self.framed_write.send(Frame::heartbeat()).await.is_err() {
                    return Some("write failed echoing heartbeat".to_string());
                }
                None
            }
            FramePayload::Heartbeat => {
                let _ = send_close(
                    &mut self.framed_write,
                    reply_code::COMMAND_INVALID,
                    "COMMAND_INVALID - heartbeat on a non-zero channel",
                )
                .await;
                Some("heartbeat on a non-zero channel".to_string())
            }
            payload => {
                let frame = Frame {
                    channel: frame.channel,
                    payload,
                };
                match self
                    .control
                    .send(BrokerControl::Inbound {
                        connection: self.id,
                        frame,
                    })
                    .await
                {
                    Ok(()) => None,
                    Err(_) => Some("broker core is gone".to_string()),
                }
            }
        }
    }
}

fn close_code_for(err: &ferrumq_codec::Error) -> u16 {
    match err {
        ferrumq_codec::Error::FrameEnd
        | ferrumq_codec::Error::FrameTooLarge { .. }
        | ferrumq_codec::Error::UnknownFrameType(_) => reply_code::FRAME_ERROR,
        ferrumq_codec::Error::UnknownMethod { .. } => reply_code::NOT_IMPLEMENTED,
        _ => reply_code::SYNTAX_ERROR,
    }
}
