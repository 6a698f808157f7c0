//! Carga y gestión de configuración de la aplicación (modelos, directorios y troceado).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

/// Dónde se calculan los embeddings de los documentos subidos.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// ONNX Runtime en el propio proceso; no necesita token.
    Local,
    /// Endpoint `feature-extraction` de la API de inferencia.
    HuggingFace,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "onnx" => Ok(Self::Local),
            "huggingface" | "hf" | "remote" => Ok(Self::HuggingFace),
            other => Err(format!("proveedor desconocido '{other}' (use 'local' o 'huggingface')")),
        }
    }
}

/// Modelos de Hugging Face usados por el asistente.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub primary_model: String,
    pub alternate_model: String,
    pub pipeline_model: String,
    pub embedding_model: String,
    pub embedding_provider: EmbeddingProvider,
}

/// Parámetros de troceado de texto.
#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub pdf_chunk_size: usize,
    pub pdf_chunk_overlap: usize,
    pub embedding_batch_size: usize,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub hf_api_token: Option<String>,
    pub hf_inference_url: String,
    pub hf_hub_url: String,
    pub model_timeout: Duration,
    pub embedding_cache_dir: PathBuf,

    pub upload_dir: PathBuf,
    pub vector_db_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub open_browser: bool,

    pub models: ModelConfig,
    pub chunking: ChunkingConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let hf_api_token = lookup("HUGGINGFACE_API_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let chunking = ChunkingConfig {
            chunk_size: parse_or(&lookup, "CHUNK_SIZE", 500)?,
            chunk_overlap: parse_or(&lookup, "CHUNK_OVERLAP", 100)?,
            pdf_chunk_size: parse_or(&lookup, "PDF_CHUNK_SIZE", 4000)?,
            pdf_chunk_overlap: parse_or(&lookup, "PDF_CHUNK_OVERLAP", 200)?,
            embedding_batch_size: parse_or(&lookup, "EMBEDDING_BATCH_SIZE", 32)?,
        };

        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(anyhow!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                chunking.chunk_overlap,
                chunking.chunk_size
            ));
        }
        if chunking.pdf_chunk_overlap >= chunking.pdf_chunk_size {
            return Err(anyhow!(
                "PDF_CHUNK_OVERLAP ({}) debe ser menor que PDF_CHUNK_SIZE ({})",
                chunking.pdf_chunk_overlap,
                chunking.pdf_chunk_size
            ));
        }
        if chunking.embedding_batch_size == 0 {
            return Err(anyhow!("EMBEDDING_BATCH_SIZE debe ser mayor que cero"));
        }

        let models = ModelConfig {
            primary_model: string_or("PRIMARY_MODEL", "google/gemma-2b"),
            alternate_model: string_or("ALTERNATE_MODEL", "microsoft/DialoGPT-medium"),
            pipeline_model: string_or("PIPELINE_MODEL", "gpt2"),
            embedding_model: string_or(
                "EMBEDDING_MODEL",
                "sentence-transformers/all-MiniLM-L6-v2",
            ),
            embedding_provider: parse_or(&lookup, "EMBEDDING_PROVIDER", EmbeddingProvider::Local)?,
        };

        Ok(Self {
            server_addr: string_or("SERVER_ADDR", "127.0.0.1:8501"),
            hf_api_token,
            hf_inference_url: string_or("HF_INFERENCE_URL", "https://api-inference.huggingface.co"),
            hf_hub_url: string_or("HF_HUB_URL", "https://huggingface.co"),
            model_timeout: Duration::from_secs(parse_or(&lookup, "MODEL_TIMEOUT_SECS", 60)?),
            embedding_cache_dir: PathBuf::from(string_or("EMBEDDING_CACHE_DIR", "models")),
            upload_dir: PathBuf::from(string_or("UPLOAD_DIR", "upload")),
            vector_db_dir: PathBuf::from(string_or("VECTOR_DB_DIR", "db")),
            frontend_dir: PathBuf::from(string_or("FRONTEND_DIR", "frontend")),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 200 * 1024 * 1024)?,
            open_browser: parse_or(&lookup, "OPEN_BROWSER", true)?,
            models,
            chunking,
        })
    }

    /// Token enmascarado para mostrarlo en la interfaz (`hf_abcdefg...wxyz`).
    pub fn masked_token(&self) -> Option<String> {
        self.hf_api_token.as_deref().map(mask_token)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 14 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = config_with(&[]).unwrap();
        assert!(cfg.hf_api_token.is_none());
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.chunk_overlap, 100);
        assert_eq!(cfg.models.primary_model, "google/gemma-2b");
        assert_eq!(cfg.upload_dir, PathBuf::from("upload"));
        assert_eq!(cfg.vector_db_dir, PathBuf::from("db"));
        assert_eq!(cfg.models.embedding_provider, EmbeddingProvider::Local);
        assert_eq!(cfg.embedding_cache_dir, PathBuf::from("models"));
        assert!(cfg.open_browser);
    }

    #[test]
    fn embedding_provider_is_selectable() {
        let cfg = config_with(&[("EMBEDDING_PROVIDER", "HuggingFace")]).unwrap();
        assert_eq!(cfg.models.embedding_provider, EmbeddingProvider::HuggingFace);

        let err = config_with(&[("EMBEDDING_PROVIDER", "openai")]).unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_PROVIDER"));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let cfg = config_with(&[("HUGGINGFACE_API_TOKEN", "   ")]).unwrap();
        assert!(cfg.hf_api_token.is_none());
        assert!(cfg.masked_token().is_none());
    }

    #[test]
    fn token_is_masked_for_display() {
        let cfg = config_with(&[("HUGGINGFACE_API_TOKEN", "hf_abcdefghijklmnopqrstuvwxyz")]).unwrap();
        assert_eq!(cfg.masked_token().as_deref(), Some("hf_abcdefg...wxyz"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = config_with(&[("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")]).unwrap_err();
        assert!(err.to_string().contains("CHUNK_OVERLAP"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config_with(&[("MODEL_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("MODEL_TIMEOUT_SECS"));
    }
}
