//! The public broker surface: lifecycle, enumeration, events

mod builder;
pub(crate) mod control;
pub(crate) mod core;

use std::net::SocketAddr;

use ferrumq_codec::FieldTable;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::control::{BrokerControl, Query};
use crate::broker::core::BrokerCore;
use crate::connection::{run_connection, EngineConfig, TuneParams};
use crate::error::Error;
use crate::events::{BrokerEvent, EventSink, EVENT_CAPACITY};
use crate::persistence::Persistence;

pub use builder::Builder;
pub(crate) use builder::Options;

/// Commands buffered toward the core before connection engines block
const CONTROL_CAPACITY: usize = 1024;

/// Aggregate entity counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStatus {
    /// Open connections
    pub connections: usize,
    /// Open channels across all connections
    pub channels: usize,
    /// Declared exchanges, defaults included
    pub exchanges: usize,
    /// Declared queues
    pub queues: usize,
    /// Active bindings, auto-created default bindings included
    pub bindings: usize,
    /// Active consumers
    pub consumers: usize,
    /// Ready messages across all queues
    pub messages: usize,
}

/// One open connection, as reported by [`Broker::connections`]
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection id
    pub id: Uuid,
    /// Remote socket address
    pub peer_addr: SocketAddr,
    /// Virtual host the client opened
    pub virtual_host: String,
    /// Username presented during the handshake
    pub username: String,
    /// Open channels on this connection
    pub channels: usize,
    /// Client identity table from `Start-Ok`
    pub client_properties: FieldTable,
}

/// One exchange, as reported by [`Broker::exchanges`]
#[derive(Debug, Clone)]
pub struct ExchangeInfo {
    /// Exchange name; empty for the default exchange
    pub name: String,
    /// Exchange type name
    pub kind: String,
    /// Survives restart
    pub durable: bool,
    /// Deleted when its last binding goes
    pub auto_delete: bool,
    /// Refuses client publishes
    pub internal: bool,
    /// Part of the built-in exchange set
    pub is_default: bool,
}

/// One queue, as reported by [`Broker::queues`]
#[derive(Debug, Clone)]
pub struct QueueInfo {
    /// Queue name
    pub name: String,
    /// Survives restart
    pub durable: bool,
    /// Restricted to its declaring connection
    pub exclusive: bool,
    /// Deleted when its consumer count returns to zero
    pub auto_delete: bool,
    /// Ready messages
    pub messages: usize,
    /// Active consumers
    pub consumers: usize,
}

/// One binding, as reported by [`Broker::bindings`]
#[derive(Debug, Clone)]
pub struct BindingInfo {
    /// Source exchange; empty for the default exchange
    pub source: String,
    /// Destination queue
    pub destination: String,
    /// Routing key or topic pattern
    pub routing_key: String,
}

/// One consumer, as reported by [`Broker::consumers`]
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    /// Consumer tag
    pub tag: String,
    /// Queue consumed from
    pub queue: String,
    /// Owning connection
    pub connection: Uuid,
    /// Owning channel
    pub channel: u16,
    /// Deliveries need no acknowledgement
    pub no_ack: bool,
    /// Sole consumer on its queue
    pub exclusive: bool,
}

#[derive(Debug)]
struct Runtime {
    control: mpsc::Sender<BrokerControl>,
    core: JoinHandle<()>,
    accept: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// An AMQP 0-9-1 broker
///
/// Construct with [`Broker::builder`], then [`start`](Broker::start) it.
/// All state lives in a single core task; this handle talks to it over a
/// command channel and can be queried concurrently from any task.
#[derive(Debug)]
pub struct Broker {
    options: Options,
    events: broadcast::Sender<BrokerEvent>,
    runtime: Option<Runtime>,
}

impl Broker {
    /// Starts building a broker
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn with_options(options: Options) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            events,
            runtime: None,
        }
    }

    /// Recovers durable state, binds the listener, and begins serving.
    /// Returns once the listener is bound and recovery is complete.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.runtime.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let persistence = Persistence::open(&self.options.data_dir).await?;
        let recovered = persistence.recover().await?;

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let mut core = BrokerCore::new(
            persistence,
            EventSink::new(self.events.clone()),
            control_rx,
        );
        core.install(
            recovered.exchanges,
            recovered.queues,
            recovered.bindings,
            recovered.messages,
        );
        core.persistence.compact(&core.queues).await?;

        let listener =
            TcpListener::bind((self.options.host.as_str(), self.options.port)).await?;
        let local_addr = listener.local_addr()?;

        let engine_config = EngineConfig {
            tune: TuneParams {
                channel_max: self.options.channel_max,
                frame_max: self.options.frame_max,
                heartbeat: self.options.heartbeat,
            },
            control: control_tx.clone(),
        };

        let core_task = tokio::spawn(core.run());
        let accept_task = tokio::spawn(accept_loop(listener, engine_config));

        self.runtime = Some(Runtime {
            control: control_tx,
            core: core_task,
            accept: accept_task,
            local_addr,
        });
        info!(%local_addr, data_dir = %self.options.data_dir.display(), "broker started");
        let _ = self.events.send(BrokerEvent::Started);
        Ok(())
    }

    /// Stops accepting, force-closes connections (320), flushes
    /// persistence, and joins the core task
    pub async fn stop(&mut self) -> Result<(), Error> {
        let Some(runtime) = self.runtime.take() else {
            return Err(Error::NotRunning);
        };
        runtime.accept.abort();

        let (done_tx, done_rx) = oneshot::channel();
        if runtime
            .control
            .send(BrokerControl::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
        runtime.core.await?;
        info!("broker stopped");
        let _ = self.events.send(BrokerEvent::Stopped);
        Ok(())
    }

    /// Address the listener is bound to, once started. With port 0 this is
    /// where the ephemeral port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.as_ref().map(|r| r.local_addr)
    }

    /// Whether `start` succeeded and `stop` has not been called
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Subscribes to the broker event stream. Slow subscribers lose the
    /// oldest events rather than slowing the broker.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, Error> {
        let runtime = self.runtime.as_ref().ok_or(Error::NotRunning)?;
        let (tx, rx) = oneshot::channel();
        runtime
            .control
            .send(BrokerControl::Query(make(tx)))
            .await
            .map_err(|_| Error::CoreGone)?;
        rx.await.map_err(|_| Error::CoreGone)
    }

    /// Aggregate entity counts
    pub async fn status(&self) -> Result<BrokerStatus, Error> {
        self.query(Query::Status).await
    }

    /// Open connections
    pub async fn connections(&self) -> Result<Vec<ConnectionInfo>, Error> {
        self.query(Query::Connections).await
    }

    /// Declared exchanges, the built-in set included
    pub async fn exchanges(&self) -> Result<Vec<ExchangeInfo>, Error> {
        self.query(Query::Exchanges).await
    }

    /// Declared queues
    pub async fn queues(&self) -> Result<Vec<QueueInfo>, Error> {
        self.query(Query::Queues).await
    }

    /// Active bindings
    pub async fn bindings(&self) -> Result<Vec<BindingInfo>, Error> {
        self.query(Query::Bindings).await
    }

    /// Active consumers
    pub async fn consumers(&self) -> Result<Vec<ConsumerInfo>, Error> {
        self.query(Query::Consumers).await
    }
}

async fn accept_loop(listener: TcpListener, config: EngineConfig) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    warn!(%peer_addr, %err, "failed to set TCP_NODELAY");
                }
                tokio::spawn(run_connection(stream, peer_addr, config.clone()));
            }
            Err(err) => {
                // transient accept failures (EMFILE and friends) should not
                // kill the listener
                warn!(%err, "accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}
