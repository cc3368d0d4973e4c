//! Durable state: the message log plus metadata snapshots
//!
//! Durability rules: exchanges and queues persist iff `durable` (exclusive
//! queues never persist), bindings persist iff their destination queue is
//! durable, and messages persist iff the destination queue is durable and
//! the message is marked persistent (`deliveryMode == 2`).

mod log;
mod snapshot;

use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::entities::{Binding, Exchange, Message, Queue};

pub(crate) use log::MessageLog;

const MESSAGES_LOG: &str = "messages.log";
const QUEUES_JSON: &str = "queues.json";
const EXCHANGES_JSON: &str = "exchanges.json";
const BINDINGS_JSON: &str = "bindings.json";

/// Everything restored from disk at startup
#[derive(Debug, Default)]
pub(crate) struct RecoveredState {
    pub exchanges: Vec<Exchange>,
    pub queues: Vec<Queue>,
    pub bindings: Vec<Binding>,
    /// Surviving `(queue, message)` pairs in log order
    pub messages: Vec<(String, Message)>,
}

#[derive(Debug)]
pub(crate) struct Persistence {
    dir: PathBuf,
    log: MessageLog,
}

impl Persistence {
    /// Opens (creating if necessary) the data directory and the message log
    pub(crate) async fn open(dir: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let log = MessageLog::open(dir.join(MESSAGES_LOG)).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            log,
        })
    }

    /// Whether a message placed on this queue must hit the log
    pub(crate) fn qualifies(queue: &Queue, message: &Message) -> bool {
        queue.durable && message.is_persistent()
    }

    /// Records a persistent message; flushed before returning
    pub(crate) async fn message_stored(&mut self, queue: &str, message: &Message) -> io::Result<()> {
        self.log.append_message(queue, message).await
    }

    /// Tombstones a persistent message; flushed before returning
    pub(crate) async fn message_removed(&mut self, queue: &str, message_id: &str) -> io::Result<()> {
        self.log.append_delete(queue, message_id).await
    }

    pub(crate) async fn save_exchanges(
        &self,
        exchanges: &IndexMap<String, Exchange>,
    ) -> io::Result<()> {
        let durable: Vec<&Exchange> = exchanges
            .values()
            .filter(|e| e.durable && !e.is_default)
            .collect();
        snapshot::save(&self.dir.join(EXCHANGES_JSON), &durable).await
    }

    pub(crate) async fn save_queues(&self, queues: &IndexMap<String, Queue>) -> io::Result<()> {
        let durable: Vec<&Queue> = queues
            .values()
            .filter(|q| q.durable && !q.exclusive)
            .collect();
        snapshot::save(&self.dir.join(QUEUES_JSON), &durable).await
    }

    pub(crate) async fn save_bindings(
        &self,
        bindings: &[Binding],
        queues: &IndexMap<String, Queue>,
    ) -> io::Result<()> {
        let durable: Vec<&Binding> = bindings
            .iter()
            .filter(|b| queues.get(&b.destination).is_some_and(|q| q.durable))
            .collect();
        snapshot::save(&self.dir.join(BINDINGS_JSON), &durable).await
    }

    /// Loads snapshots and replays the message log
    ///
    /// Filters applied here rather than at save time guard against files
    /// edited or copied in from elsewhere: non-durable exchanges and queues
    /// are dropped, exclusive queues are dropped, bindings survive only if
    /// both endpoints did, and messages survive only onto loaded queues.
    pub(crate) async fn recover(&self) -> io::Result<RecoveredState> {
        let exchanges: Vec<Exchange> = snapshot::load(&self.dir.join(EXCHANGES_JSON))
            .await?
            .into_iter()
            .filter(|e: &Exchange| e.durable)
            .collect();
        let queues: Vec<Queue> = snapshot::load(&self.dir.join(QUEUES_JSON))
            .await?
            .into_iter()
            .filter(|q: &Queue| q.durable && !q.exclusive)
            .collect();

        let bindings: Vec<Binding> = snapshot::load(&self.dir.join(BINDINGS_JSON))
            .await?
            .into_iter()
            .filter(|b: &Binding| {
                let source_ok = b.source.is_empty() || exchanges.iter().any(|e| e.name == b.source);
                let dest_ok = queues.iter().any(|q| q.name == b.destination);
                source_ok && dest_ok
            })
            .collect();

        let messages = MessageLog::replay(&self.dir.join(MESSAGES_LOG))
            .await?
            .into_iter()
            .filter(|(queue, _)| queues.iter().any(|q| q.name == *queue))
            .collect::<Vec<_>>();

        info!(
            exchanges = exchanges.len(),
            queues = queues.len(),
            bindings = bindings.len(),
            messages = messages.len(),
            "recovered durable state"
        );

        Ok(RecoveredState {
            exchanges,
            queues,
            bindings,
            messages,
        })
    }

    /// Rewrites the log down to the currently live persistent messages
    pub(crate) async fn compact(&mut self, queues: &IndexMap<String, Queue>) -> io::Result<()> {
        let live = queues.values().flat_map(|queue| {
            queue
                .messages
                .iter()
                .filter(|m| Self::qualifies(queue, m))
                .map(move |m| (queue.name.as_str(), m))
        });
        self.log.compact(live).await?;
        debug!("compacted message log");
        Ok(())
    }

    /// Flushes the log before shutdown
    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.log.sync().await
    }
}
