//! Vector store local y persistente.
//!
//! Cada registro (embedding, texto del chunk, metadatos de origen) es una línea
//! JSON en `<db_dir>/records.jsonl`. Los registros sólo se añaden: nunca se
//! actualizan ni se borran, y no hay deduplicación.
//!
//! API pública:
//!   - `VectorStore::open(dir)`
//!   - `VectorStore::append(records)`
//!   - `VectorStore::list_sources()` / `records()` / `count()`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const RECORDS_FILE: &str = "records.jsonl";

/// Metadatos de origen de un chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Un registro del vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: RecordMetadata,
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn new(embedding: Vec<f32>, text: String, metadata: RecordMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            embedding,
            text,
            metadata,
            created_at: Utc::now(),
        }
    }
}

pub struct VectorStore {
    path: PathBuf,
    // Serializa las escrituras dentro del proceso para no intercalar líneas.
    write_lock: Mutex<()>,
}

impl VectorStore {
    /// Abre (o crea) el directorio del store.
    pub async fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("no se pudo crear el directorio del vector store {}", dir.display()))?;
        let path = dir.join(RECORDS_FILE);
        info!("Vector store en {}", path.display());
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Añade los registros al final del fichero y fuerza su escritura a disco.
    pub async fn append(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("no se pudo abrir {}", self.path.display()))?;
        file.write_all(&buffer).await?;
        file.sync_data().await?;

        debug!("{} registros añadidos a {}", records.len(), self.path.display());
        Ok(records.len())
    }

    /// Todos los registros en orden de inserción. Un store vacío no es un error.
    pub async fn records(&self) -> Result<Vec<VectorRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("no se pudo leer {}", self.path.display()))
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<VectorRecord>(line)
                    .with_context(|| format!("registro corrupto en la línea {} de {}", n + 1, self.path.display()))
            })
            .collect()
    }

    /// Identificador de origen de cada registro, sin deduplicar.
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .map(|r| r.metadata.source)
            .collect())
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.records().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(source: &str, page: Option<u32>) -> VectorRecord {
        VectorRecord::new(
            vec![0.1, 0.2, 0.3],
            format!("chunk from {source}"),
            RecordMetadata { source: source.to_string(), page },
        )
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&dir.path().join("db")).await.unwrap();
        assert!(store.list_sources().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn records_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = VectorStore::open(dir.path()).await.unwrap();
            let written = tokio_test::assert_ok!(
                store.append(&[record("upload/a.txt", None), record("upload/b.pdf", Some(2))]).await
            );
            assert_eq!(written, 2);
        }

        let reopened = VectorStore::open(dir.path()).await.unwrap();
        let records = reopened.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].metadata.page, Some(2));
        assert_eq!(records[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn sources_are_not_deduplicated() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();
        store.append(&[record("upload/a.txt", None)]).await.unwrap();
        store.append(&[record("upload/a.txt", None)]).await.unwrap();

        assert_eq!(store.list_sources().await.unwrap(), vec!["upload/a.txt", "upload/a.txt"]);
    }

    #[tokio::test]
    async fn corrupt_lines_are_reported() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();
        tokio::fs::write(store.path(), "{not json}\n").await.unwrap();

        let err = store.list_sources().await.unwrap_err();
        assert!(format!("{err:#}").contains("línea 1"));
    }
}
