//! Ingesta de un fichero subido: se guarda en el directorio de subidas, se
//! extrae su texto, se trocea, se vectoriza y se añade al vector store.
//!
//! No hay rollback: si falla un lote de embeddings, los lotes anteriores ya
//! escritos permanecen en el store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    app_state::StatusHandle,
    chunking::RecursiveSplitter,
    config::AppConfig,
    llm::Embedder,
    loaders::{self, DocumentKind, PageText},
    vector_store::{RecordMetadata, VectorRecord, VectorStore},
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Nombre de fichero inválido: '{0}'")]
    InvalidFilename(String),

    #[error("Formato no soportado ('{0}'). Formatos aceptados: pdf, txt, docx")]
    UnsupportedExtension(String),

    #[error("No se pudo guardar '{file}'")]
    Save {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error extrayendo texto de '{file}': {message}")]
    Extraction { file: String, message: String },

    #[error("'{file}' no contiene texto extraíble")]
    NoText { file: String },

    #[error("Error generando embeddings para '{file}': {message}")]
    Embedding { file: String, message: String },

    #[error("Error escribiendo en el vector store para '{file}': {message}")]
    Store { file: String, message: String },
}

impl IngestError {
    /// Errores causados por la petición en sí (antes de tocar el disco).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidFilename(_) | Self::UnsupportedExtension(_))
    }
}

/// Resumen de la ingesta de un fichero.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub filename: String,
    pub source: String,
    pub kind: DocumentKind,
    pub mime_type: Option<String>,
    pub pages: usize,
    pub chunks_created: usize,
    pub records_written: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' procesado: {} chunks, {} registros guardados en el vector store.",
            self.filename, self.chunks_created, self.records_written
        )
    }
}

struct PendingChunk {
    text: String,
    page: Option<u32>,
}

pub struct Ingestor {
    upload_dir: PathBuf,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    text_splitter: RecursiveSplitter,
    page_splitter: RecursiveSplitter,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(cfg: &AppConfig, store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        let chunking = &cfg.chunking;
        Self {
            upload_dir: cfg.upload_dir.clone(),
            store,
            embedder,
            text_splitter: RecursiveSplitter::new(chunking.chunk_size, chunking.chunk_overlap),
            page_splitter: RecursiveSplitter::new(chunking.pdf_chunk_size, chunking.pdf_chunk_overlap),
            batch_size: chunking.embedding_batch_size.max(1),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Procesa un fichero subido de principio a fin.
    pub async fn ingest_upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        status: &StatusHandle,
    ) -> Result<IngestionSummary, IngestError> {
        // Sólo el último componente: la subida no puede escapar del directorio.
        let name = Path::new(filename)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| IngestError::InvalidFilename(filename.to_string()))?;

        let kind = DocumentKind::from_path(Path::new(&name)).ok_or_else(|| {
            let extension = Path::new(&name)
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            IngestError::UnsupportedExtension(extension)
        })?;

        // --- Fase 1: Guardar el fichero ---
        let path = self.save_upload(&name, &bytes).await?;
        let source = path.to_string_lossy().to_string();
        let mime_type = mime_guess::from_path(&path).first().map(|m| m.to_string());
        info!("📄 Procesando {} ({:?}, {} bytes)", source, kind, bytes.len());
        status.progress(format!("Extrayendo texto de '{name}'..."), 0.1);

        // --- Fase 2: Extracción y troceado ---
        let pages = loaders::load(kind, bytes).await.map_err(|e| IngestError::Extraction {
            file: name.clone(),
            message: format!("{e:#}"),
        })?;
        let chunks = self.split_pages(kind, &pages);
        if chunks.is_empty() {
            warn!("Fichero vacío o sin texto útil: {}", source);
            return Err(IngestError::NoText { file: name });
        }
        info!("'{}': {} páginas, {} chunks", name, pages.len(), chunks.len());

        // --- Fase 3: Embeddings y escritura por lotes ---
        let total = chunks.len();
        let mut records_written = 0;
        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            status.progress(
                format!(
                    "Generando embeddings de '{}' ({}/{})...",
                    name,
                    (batch_index * self.batch_size + batch.len()).min(total),
                    total
                ),
                0.2 + 0.8 * (batch_index * self.batch_size) as f32 / total as f32,
            );

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.embed_texts(&texts).await.map_err(|e| {
                error!("Error de embeddings en {}: {e:#}", source);
                IngestError::Embedding {
                    file: name.clone(),
                    message: format!("{e:#}"),
                }
            })?;
            if embeddings.len() != batch.len() {
                return Err(IngestError::Embedding {
                    file: name.clone(),
                    message: format!(
                        "se esperaban {} embeddings y llegaron {}",
                        batch.len(),
                        embeddings.len()
                    ),
                });
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    VectorRecord::new(
                        embedding,
                        chunk.text.clone(),
                        RecordMetadata {
                            source: source.clone(),
                            page: chunk.page,
                        },
                    )
                })
                .collect();

            records_written += self.store.append(&records).await.map_err(|e| IngestError::Store {
                file: name.clone(),
                message: format!("{e:#}"),
            })?;
        }

        info!("✅ Ingerido {} con {} chunks.", source, total);
        Ok(IngestionSummary {
            filename: name,
            source,
            kind,
            mime_type,
            pages: pages.len(),
            chunks_created: total,
            records_written,
        })
    }

    async fn save_upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, IngestError> {
        let save_err = |source| IngestError::Save {
            file: name.to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.upload_dir).await.map_err(save_err)?;
        let path = self.upload_dir.join(name);
        tokio::fs::write(&path, bytes).await.map_err(save_err)?;
        Ok(path)
    }

    /// Los PDF se trocean página a página; el resto como un único texto.
    fn split_pages(&self, kind: DocumentKind, pages: &[PageText]) -> Vec<PendingChunk> {
        let splitter = match kind {
            DocumentKind::Pdf => &self.page_splitter,
            DocumentKind::Txt | DocumentKind::Docx => &self.text_splitter,
        };

        pages
            .iter()
            .flat_map(|page| {
                splitter.split(&page.text).into_iter().map(move |text| PendingChunk {
                    text,
                    page: page.page,
                })
            })
            .collect()
    }
}
