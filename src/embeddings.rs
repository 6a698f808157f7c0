//! Embeddings locales con ONNX Runtime.
//!
//! El modelo (`onnx/model.onnx`) y su `tokenizer.json` se descargan del Hub la
//! primera vez que se necesitan y quedan en `EMBEDDING_CACHE_DIR`. Con la
//! caché poblada, vectorizar no requiere red ni token.
//!
//! La salida es la media de `last_hidden_state` ponderada por la máscara de
//! atención y normalizada L2, igual que `sentence-transformers`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use reqwest::Client;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::AppConfig;
use crate::llm::Embedder;

/// Longitud máxima de secuencia de all-MiniLM-L6-v2.
const MAX_SEQUENCE_LENGTH: usize = 256;
const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

pub struct OnnxEmbedder {
    model: String,
    hub_url: String,
    cache_dir: PathBuf,
    token: Option<String>,
    http: Client,
    loaded: OnceCell<Arc<LoadedModel>>,
}

impl OnnxEmbedder {
    pub fn new(model: &str, hub_url: &str, cache_dir: &Path, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("no se pudo construir el cliente HTTP")?;
        Ok(Self {
            model: model.to_string(),
            hub_url: hub_url.trim_end_matches('/').to_string(),
            cache_dir: cache_dir.to_path_buf(),
            token,
            http,
            loaded: OnceCell::new(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::new(
            &cfg.models.embedding_model,
            &cfg.hf_hub_url,
            &cfg.embedding_cache_dir,
            cfg.hf_api_token.clone(),
        )
    }

    /// Directorio de caché de este modelo (`org/name` → `org--name`).
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(self.model.replace('/', "--"))
    }

    async fn loaded(&self) -> Result<Arc<LoadedModel>> {
        self.loaded
            .get_or_try_init(|| async {
                let dir = self.model_dir();
                let model_path = self.ensure_file(&dir, "onnx/model.onnx", MODEL_FILE).await?;
                let tokenizer_path = self.ensure_file(&dir, TOKENIZER_FILE, TOKENIZER_FILE).await?;

                let model = tokio::task::spawn_blocking(move || load_model(&model_path, &tokenizer_path))
                    .await
                    .context("la carga del modelo de embeddings terminó de forma inesperada")??;
                info!("🧮 Modelo de embeddings {} cargado desde {}", self.model, dir.display());
                Ok::<_, anyhow::Error>(Arc::new(model))
            })
            .await
            .cloned()
    }

    /// Devuelve la ruta local de `remote`, descargándolo si no está en caché.
    async fn ensure_file(&self, dir: &Path, remote: &str, local: &str) -> Result<PathBuf> {
        let path = dir.join(local);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        let url = format!("{}/{}/resolve/main/{}", self.hub_url, self.model, remote);
        info!("Descargando {url}");
        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("no se pudo descargar {url}"))?;
        if !response.status().is_success() {
            return Err(anyhow!("la descarga de {url} devolvió {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("descarga incompleta de {url}"))?;

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("no se pudo crear {}", dir.display()))?;
        // Se escribe a un temporal para no dejar un fichero a medias en la caché.
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes)
            .await
            .with_context(|| format!("no se pudo escribir {}", partial.display()))?;
        tokio::fs::rename(&partial, &path).await?;

        info!("{} descargado ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

fn load_model(model_path: &Path, tokenizer_path: &Path) -> Result<LoadedModel> {
    let session = Session::builder()
        .map_err(|e| anyhow!("no se pudo crear la sesión ONNX: {e}"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| anyhow!("nivel de optimización no válido: {e}"))?
        .with_intra_threads(4)
        .map_err(|e| anyhow!("no se pudo fijar el número de hilos: {e}"))?
        .commit_from_file(model_path)
        .map_err(|e| anyhow!("no se pudo cargar {}: {e}", model_path.display()))?;

    let tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| anyhow!("no se pudo cargar {}: {e}", tokenizer_path.display()))?;

    Ok(LoadedModel {
        session: Mutex::new(session),
        tokenizer,
    })
}

impl LoadedModel {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| anyhow!("fallo tokenizando: {e}"))?;

        let batch = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(MAX_SEQUENCE_LENGTH);

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        let mut token_type_ids = vec![0i64; batch * seq_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            for j in 0..ids.len().min(seq_len) {
                input_ids[i * seq_len + j] = ids[j] as i64;
                attention_mask[i * seq_len + j] = mask[j] as i64;
                token_type_ids[i * seq_len + j] = types[j] as i64;
            }
        }

        let shape = vec![batch, seq_len];
        let ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| anyhow!("tensor input_ids: {e}"))?;
        let mask_tensor = Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
            .map_err(|e| anyhow!("tensor attention_mask: {e}"))?;
        let types_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(|e| anyhow!("tensor token_type_ids: {e}"))?;
        let session_inputs = vec![
            ("input_ids", ids_tensor.into_dyn()),
            ("attention_mask", mask_tensor.into_dyn()),
            ("token_type_ids", types_tensor.into_dyn()),
        ];

        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        let outputs = session
            .run(session_inputs)
            .map_err(|e| anyhow!("fallo en la inferencia: {e}"))?;

        let named: Vec<_> = outputs.iter().collect();
        let hidden_state = named
            .iter()
            .find(|(name, _)| *name == "last_hidden_state")
            .or_else(|| named.first())
            .map(|(_, value)| value)
            .ok_or_else(|| anyhow!("el modelo no produjo ninguna salida"))?;
        let (dims, data) = hidden_state
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("salida del modelo no legible: {e}"))?;
        let hidden_size = dims
            .get(2)
            .map(|&d| d as usize)
            .ok_or_else(|| anyhow!("forma de salida inesperada: {dims:?}"))?;

        Ok(mean_pool(data, &attention_mask, batch, seq_len, hidden_size))
    }
}

/// Media de los estados ocultos con máscara, normalizada L2.
fn mean_pool(hidden: &[f32], mask: &[i64], batch: usize, seq_len: usize, hidden_size: usize) -> Vec<Vec<f32>> {
    (0..batch)
        .map(|i| {
            let mut sum = vec![0.0f32; hidden_size];
            let mut count = 0.0f32;
            for j in 0..seq_len {
                if mask[i * seq_len + j] == 0 {
                    continue;
                }
                let row = (i * seq_len + j) * hidden_size;
                for (k, value) in sum.iter_mut().enumerate() {
                    *value += hidden.get(row + k).copied().unwrap_or(0.0);
                }
                count += 1.0;
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|v| *v /= count);
            }
            let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                sum.iter_mut().for_each(|v| *v /= norm);
            }
            sum
        })
        .collect()
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.loaded().await?;
        let owned = texts.to_vec();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(&owned))
            .await
            .context("la tarea de embeddings terminó de forma inesperada")??;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                embeddings.len(),
                texts.len()
            ));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pooling_ignores_padding_and_normalizes() {
        // batch 2, secuencia 2, dimensión 2
        let hidden = [1.0, 0.0, 3.0, 0.0, 0.0, 2.0, 9.0, 9.0];
        let mask = [1, 1, 1, 0];

        let pooled = mean_pool(&hidden, &mask, 2, 2, 2);

        assert_eq!(pooled, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn fully_masked_rows_stay_zero() {
        let pooled = mean_pool(&[5.0, 5.0], &[0], 1, 1, 2);
        assert_eq!(pooled, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn cache_dir_is_per_model() {
        let dir = TempDir::new().unwrap();
        let embedder =
            OnnxEmbedder::new("sentence-transformers/all-MiniLM-L6-v2", "https://huggingface.co", dir.path(), None)
                .unwrap();
        assert_eq!(embedder.model_dir(), dir.path().join("sentence-transformers--all-MiniLM-L6-v2"));
    }

    #[tokio::test]
    async fn unreachable_hub_is_an_error_without_partial_files() {
        let dir = TempDir::new().unwrap();
        let embedder = OnnxEmbedder::new("org/model", "http://127.0.0.1:9", dir.path(), None).unwrap();

        let err = embedder.embed_texts(&["hello world".to_string()]).await.unwrap_err();

        assert!(format!("{err:#}").contains("127.0.0.1:9"));
        assert!(!embedder.model_dir().join(MODEL_FILE).exists());
    }

    #[tokio::test]
    async fn empty_batches_never_touch_the_model() {
        let dir = TempDir::new().unwrap();
        let embedder = OnnxEmbedder::new("org/model", "http://127.0.0.1:9", dir.path(), None).unwrap();
        assert!(embedder.embed_texts(&[]).await.unwrap().is_empty());
    }
}
