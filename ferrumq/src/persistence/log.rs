//! Append-only message log
//!
//! One JSON record per line. A `message` record carries the serialized
//! message base64-encoded plus an md5 checksum of the encoded bytes; a
//! `delete` record tombstones it. Appends are fsynced before the broker
//! acknowledges the client action that caused them.

use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::entities::Message;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LogRecord {
    Message {
        queue: String,
        #[serde(rename = "messageId")]
        message_id: String,
        data: String,
        checksum: String,
    },
    Delete {
        queue: String,
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn to_io(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[derive(Debug)]
pub(crate) struct MessageLog {
    path: PathBuf,
    file: File,
}

impl MessageLog {
    pub(crate) async fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    async fn append(&mut self, record: &LogRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(to_io)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.sync_data().await
    }

    /// Appends a message record; flushed before returning
    pub(crate) async fn append_message(&mut self, queue: &str, message: &Message) -> io::Result<()> {
        let encoded = serde_json::to_vec(message).map_err(to_io)?;
        let record = LogRecord::Message {
            queue: queue.to_string(),
            message_id: message.id.clone(),
            checksum: md5_hex(&encoded),
            data: BASE64.encode(encoded),
        };
        self.append(&record).await
    }

    /// Appends a delete tombstone; flushed before returning
    pub(crate) async fn append_delete(&mut self, queue: &str, message_id: &str) -> io::Result<()> {
        let record = LogRecord::Delete {
            queue: queue.to_string(),
            message_id: message_id.to_string(),
        };
        self.append(&record).await
    }

    /// Replays a log into the surviving `(queue, message)` pairs, in append
    /// order. Records that fail their checksum are skipped with a warning;
    /// a truncated or garbled trailing line is skipped the same way.
    pub(crate) async fn replay(path: &Path) -> io::Result<Vec<(String, Message)>> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut live: Vec<(String, Message)> = Vec::new();
        for (lineno, line) in raw.split(|b| *b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let record: LogRecord = match serde_json::from_slice(line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(line = lineno + 1, %err, "skipping unparseable log record");
                    continue;
                }
            };
            match record {
                LogRecord::Message {
                    queue,
                    message_id,
                    data,
                    checksum,
                } => {
                    let decoded = match BASE64.decode(&data) {
                        Ok(decoded) => decoded,
                        Err(err) => {
                            warn!(line = lineno + 1, %message_id, %err, "skipping undecodable log record");
                            continue;
                        }
                    };
                    if md5_hex(&decoded) != checksum {
                        warn!(line = lineno + 1, %message_id, "skipping log record with bad checksum");
                        continue;
                    }
                    match serde_json::from_slice::<Message>(&decoded) {
                        Ok(message) => live.push((queue, message)),
                        Err(err) => {
                            warn!(line = lineno + 1, %message_id, %err, "skipping malformed message envelope");
                        }
                    }
                }
                LogRecord::Delete { queue, message_id } => {
                    if let Some(at) = live
                        .iter()
                        .position(|(q, m)| *q == queue && m.id == message_id)
                    {
                        live.remove(at);
                    }
                }
            }
        }
        Ok(live)
    }

    /// Rewrites the log to one message record per live message, atomically
    /// renames it into place, and reopens for append
    pub(crate) async fn compact<'a>(
        &mut self,
        live: impl Iterator<Item = (&'a str, &'a Message)>,
    ) -> io::Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        {
            let mut file = File::create(&tmp).await?;
            for (queue, message) in live {
                let encoded = serde_json::to_vec(message).map_err(to_io)?;
                let record = LogRecord::Message {
                    queue: queue.to_string(),
                    message_id: message.id.clone(),
                    checksum: md5_hex(&encoded),
                    data: BASE64.encode(encoded),
                };
                let mut line = serde_json::to_vec(&record).map_err(to_io)?;
                line.push(b'\n');
                file.write_all(&line).await?;
            }
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;
        self.file = OpenOptions::new().append(true).open(&self.path).await?;
        Ok(())
    }

    /// Flushes outstanding appends to disk
    pub(crate) async fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use ferrumq_codec::BasicProperties;

    fn message(id: &str, body: &str) -> Message {
        Message {
            id: id.into(),
            exchange: String::new(),
            routing_key: "q".into(),
            mandatory: false,
            immediate: false,
            properties: BasicProperties {
                delivery_mode: Some(2),
                ..Default::default()
            },
            content: Bytes::copy_from_slice(body.as_bytes()),
            timestamp: Utc::now(),
            redelivered: false,
            origin: None,
        }
    }

    #[tokio::test]
    async fn append_then_replay_restores_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");

        let mut log = MessageLog::open(path.clone()).await.unwrap();
        log.append_message("q", &message("m1", "first")).await.unwrap();
        log.append_message("q", &message("m2", "second")).await.unwrap();
        log.append_delete("q", "m1").await.unwrap();

        let live = MessageLog::replay(&path).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, "q");
        assert_eq!(live[0].1.id, "m2");
        assert_eq!(&live[0].1.content[..], b"second");
    }

    #[tokio::test]
    async fn corrupt_record_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");

        let mut log = MessageLog::open(path.clone()).await.unwrap();
        log.append_message("q", &message("m1", "good")).await.unwrap();

        // corrupt the stored checksum so the record fails verification
        let text = std::fs::read_to_string(&path).unwrap();
        let mut record: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        record["checksum"] = serde_json::Value::from("0".repeat(32));
        std::fs::write(&path, format!("{record}\n")).unwrap();
        // second record is intact
        let mut log = MessageLog::open(path.clone()).await.unwrap();
        log.append_message("q", &message("m2", "still good"))
            .await
            .unwrap();

        let live = MessageLog::replay(&path).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].1.id, "m2");
    }

    #[tokio::test]
    async fn compact_drops_tombstoned_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");

        let mut log = MessageLog::open(path.clone()).await.unwrap();
        log.append_message("q", &message("m1", "one")).await.unwrap();
        log.append_message("q", &message("m2", "two")).await.unwrap();
        log.append_delete("q", "m1").await.unwrap();

        let keep = message("m2", "two");
        log.compact([("q", &keep)].into_iter()).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(!text.contains("delete"));

        // the reopened handle still appends
        log.append_message("q", &message("m3", "three")).await.unwrap();
        let live = MessageLog::replay(&path).await.unwrap();
        assert_eq!(live.len(), 2);
    }
}
