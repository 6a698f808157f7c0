//! Abstracción sobre la API de inferencia de Hugging Face.
//!
//! Expone dos costuras con `async_trait`: `GenerationBackend` (un intento de
//! generación de texto) y `Embedder` (vectorización de chunks). El resto del
//! crate sólo depende de los traits, lo que permite sustituirlos en los tests.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::{AppConfig, EmbeddingProvider};
use crate::embeddings::OnnxEmbedder;

// ---------------------------------------------------------------------
// CLIENTE HTTP
// ---------------------------------------------------------------------

/// Cliente mínimo para `api-inference.huggingface.co`.
#[derive(Clone, Debug)]
pub struct HuggingFaceClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub do_sample: bool,
    pub return_full_text: bool,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

#[derive(Deserialize)]
struct InferenceError {
    error: String,
}

impl HuggingFaceClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: std::time::Duration) -> Result<Self> {
        // Sin la barra final, `Url::join` reemplazaría el último segmento.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("URL de inferencia inválida: {base_url}"))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("no se pudo construir el cliente HTTP")?;
        Ok(Self { http, base_url, token })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::new(&cfg.hf_inference_url, cfg.hf_api_token.clone(), cfg.model_timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("no se pudo construir la URL para '{path}'"))
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<reqwest::Response> {
        let mut request = self.http.post(url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("fallo llamando a {url}"))?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<InferenceError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(anyhow!("{url} devolvió {status}: {}", truncate(&detail, 200)));
        }
        Ok(response)
    }

    /// Llama a la tarea `text-generation` y devuelve el primer texto generado.
    pub async fn text_generation(
        &self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct GenerationRequest<'a> {
            inputs: &'a str,
            parameters: &'a GenerationParams,
            options: InferenceOptions,
        }

        let url = self.endpoint(&format!("models/{model}"))?;
        let response = self
            .post_json(
                url,
                &GenerationRequest {
                    inputs: prompt,
                    parameters: params,
                    options: InferenceOptions { wait_for_model: true },
                },
            )
            .await?;

        let generated = response
            .json::<Vec<GeneratedText>>()
            .await
            .with_context(|| format!("respuesta de generación no decodificable para {model}"))?;

        generated
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| anyhow!("el modelo {model} no devolvió ninguna secuencia"))
    }

    /// Llama a `feature-extraction` con un lote de textos.
    pub async fn feature_extraction(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct FeatureRequest<'a> {
            inputs: &'a [String],
            options: InferenceOptions,
        }

        let url = self.endpoint(&format!("pipeline/feature-extraction/{model}"))?;
        let response = self
            .post_json(
                url,
                &FeatureRequest {
                    inputs: texts,
                    options: InferenceOptions { wait_for_model: true },
                },
            )
            .await?;

        response
            .json::<Vec<Vec<f32>>>()
            .await
            .with_context(|| format!("respuesta de embeddings no decodificable para {model}"))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------
// GENERACIÓN DE TEXTO
// ---------------------------------------------------------------------

/// Etapa de la cadena de respuesta que ocupa un backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Modelo causal grande con prompt por turnos.
    Primary,
    /// Modelo de diálogo con prompt "User/Assistant".
    Alternate,
    /// Pipeline genérico de generación de texto.
    Pipeline,
}

/// Formato del prompt que espera cada modelo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    Turns,
    Dialogue,
    QuestionAnswer,
}

impl PromptStyle {
    pub fn render(self, query: &str) -> String {
        match self {
            PromptStyle::Turns => {
                format!("<start_of_turn>user\n{query}<end_of_turn>\n<start_of_turn>model\n")
            }
            PromptStyle::Dialogue => format!("User: {query}\nAssistant:"),
            PromptStyle::QuestionAnswer => format!("Question: {query}\nAnswer:"),
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn model(&self) -> &str;
    async fn generate(&self, query: &str) -> Result<String>;
}

/// Backend de generación sobre un modelo concreto de Hugging Face.
pub struct HfTextGeneration {
    client: HuggingFaceClient,
    kind: BackendKind,
    model: String,
    style: PromptStyle,
    params: GenerationParams,
}

impl HfTextGeneration {
    pub fn primary(client: HuggingFaceClient, model: &str) -> Self {
        Self {
            client,
            kind: BackendKind::Primary,
            model: model.to_string(),
            style: PromptStyle::Turns,
            params: GenerationParams {
                max_new_tokens: 200,
                temperature: Some(0.7),
                top_p: Some(0.9),
                do_sample: true,
                return_full_text: false,
            },
        }
    }

    pub fn alternate(client: HuggingFaceClient, model: &str) -> Self {
        Self {
            client,
            kind: BackendKind::Alternate,
            model: model.to_string(),
            style: PromptStyle::Dialogue,
            params: GenerationParams {
                max_new_tokens: 150,
                temperature: Some(0.8),
                top_p: None,
                do_sample: true,
                return_full_text: false,
            },
        }
    }

    pub fn pipeline(client: HuggingFaceClient, model: &str) -> Self {
        Self {
            client,
            kind: BackendKind::Pipeline,
            model: model.to_string(),
            style: PromptStyle::QuestionAnswer,
            params: GenerationParams {
                max_new_tokens: 100,
                temperature: None,
                top_p: None,
                do_sample: false,
                return_full_text: false,
            },
        }
    }
}

#[async_trait]
impl GenerationBackend for HfTextGeneration {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, query: &str) -> Result<String> {
        let prompt = self.style.render(query);
        debug!("Generando con {} ({:?})", self.model, self.kind);
        let raw = self
            .client
            .text_generation(&self.model, &prompt, &self.params)
            .await?;
        Ok(strip_prompt(&raw, &prompt))
    }
}

/// Elimina el prompt si el modelo lo repite y recorta espacios.
pub fn strip_prompt(generated: &str, prompt: &str) -> String {
    generated.replace(prompt, "").trim().to_string()
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct HfEmbedder {
    client: HuggingFaceClient,
    model: String,
}

impl HfEmbedder {
    pub fn new(client: HuggingFaceClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for HfEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.client.feature_extraction(&self.model, texts).await?;

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

// ---------------------------------------------------------------------
// GESTOR
// ---------------------------------------------------------------------

/// Gestor de backends de generación y del modelo de embeddings.
#[derive(Clone)]
pub struct LlmManager {
    pub backends: Vec<Arc<dyn GenerationBackend>>,
    pub embedder: Arc<dyn Embedder>,
    pub embedding_provider: EmbeddingProvider,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    ///
    /// Sin token no se registra ningún backend generativo: todas las consultas
    /// se responden con plantillas. Los embeddings no dependen del token salvo
    /// que se elija el proveedor remoto.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let client = HuggingFaceClient::from_config(cfg)?;

        let backends: Vec<Arc<dyn GenerationBackend>> = if cfg.hf_api_token.is_some() {
            vec![
                Arc::new(HfTextGeneration::primary(client.clone(), &cfg.models.primary_model)),
                Arc::new(HfTextGeneration::alternate(client.clone(), &cfg.models.alternate_model)),
                Arc::new(HfTextGeneration::pipeline(client.clone(), &cfg.models.pipeline_model)),
            ]
        } else {
            Vec::new()
        };

        let embedding_provider = cfg.models.embedding_provider;
        let embedder: Arc<dyn Embedder> = match embedding_provider {
            EmbeddingProvider::Local => Arc::new(OnnxEmbedder::from_config(cfg)?),
            EmbeddingProvider::HuggingFace => Arc::new(HfEmbedder::new(client, &cfg.models.embedding_model)),
        };
        Ok(Self {
            backends,
            embedder,
            embedding_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn prompts_match_each_model_family() {
        assert_eq!(
            PromptStyle::Turns.render("hi"),
            "<start_of_turn>user\nhi<end_of_turn>\n<start_of_turn>model\n"
        );
        assert_eq!(PromptStyle::Dialogue.render("hi"), "User: hi\nAssistant:");
        assert_eq!(PromptStyle::QuestionAnswer.render("hi"), "Question: hi\nAnswer:");
    }

    #[test]
    fn echoed_prompt_is_removed() {
        let prompt = PromptStyle::Dialogue.render("What is CQRS?");
        let raw = format!("{prompt}  CQRS separates reads from writes. ");
        assert_eq!(strip_prompt(&raw, &prompt), "CQRS separates reads from writes.");
    }

    #[test]
    fn endpoints_keep_model_namespace() {
        let client = HuggingFaceClient::new(
            "https://api-inference.huggingface.co",
            None,
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        let url = client.endpoint("models/google/gemma-2b").unwrap();
        assert_eq!(url.as_str(), "https://api-inference.huggingface.co/models/google/gemma-2b");
    }

    #[test]
    fn backends_depend_on_token_presence() {
        let without = AppConfig::from_lookup(|_| None).unwrap();
        assert!(LlmManager::from_config(&without).unwrap().backends.is_empty());

        let vars: HashMap<&str, &str> = [("HUGGINGFACE_API_TOKEN", "hf_token_for_tests_1234")].into();
        let with = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let manager = LlmManager::from_config(&with).unwrap();
        let kinds: Vec<BackendKind> = manager.backends.iter().map(|b| b.kind()).collect();
        assert_eq!(kinds, vec![BackendKind::Primary, BackendKind::Alternate, BackendKind::Pipeline]);
        assert_eq!(manager.embedder.model(), "sentence-transformers/all-MiniLM-L6-v2");
    }

    #[test]
    fn embeddings_stay_local_without_token() {
        let without = AppConfig::from_lookup(|_| None).unwrap();
        let manager = LlmManager::from_config(&without).unwrap();
        assert_eq!(manager.embedding_provider, EmbeddingProvider::Local);
        assert_eq!(manager.embedder.model(), "sentence-transformers/all-MiniLM-L6-v2");

        let remote = AppConfig::from_lookup(|k| (k == "EMBEDDING_PROVIDER").then(|| "huggingface".to_string())).unwrap();
        assert_eq!(
            LlmManager::from_config(&remote).unwrap().embedding_provider,
            EmbeddingProvider::HuggingFace
        );
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "x".repeat(300);
        let short = truncate(&long, 200);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), 203);
    }
}
