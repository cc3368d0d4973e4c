//! Metadata snapshots
//!
//! Each entity collection is a pretty-printed JSON array in its own file.
//! Writes go to a `*.tmp` sibling and rename into place so a crash never
//! leaves a half-written snapshot; missing files load as empty collections.

use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) async fn save<T: Serialize>(path: &Path, items: &[T]) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(items)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await
}

pub(crate) async fn load<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Exchange, ExchangeKind};
    use ferrumq_codec::FieldTable;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchanges.json");

        let items = vec![Exchange {
            name: "logs".into(),
            kind: ExchangeKind::Fanout,
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: FieldTable::new(),
            is_default: false,
        }];
        save(&path, &items).await.unwrap();
        assert!(!dir.path().join("exchanges.tmp").exists());

        let loaded: Vec<Exchange> = load(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "logs");
        assert_eq!(loaded[0].kind, ExchangeKind::Fanout);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Vec<Exchange> = load(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_empty());
    }
}
