//! Cadena de respuesta: prueba los backends generativos en orden y, si todos
//! fallan, cae en una plantilla predefinida por tema.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::llm::{BackendKind, GenerationBackend};
use crate::templates::{self, Topic};

/// Longitud mínima (en caracteres) para aceptar una generación.
const MIN_RESPONSE_CHARS: usize = 10;

/// Quién produjo la respuesta.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOrigin {
    Model { kind: BackendKind, model: String },
    Template { topic: Option<Topic> },
}

/// Intento fallido de un backend, para mostrarlo en la interfaz.
#[derive(Debug, Clone, Serialize)]
pub struct FailedAttempt {
    pub kind: BackendKind,
    pub model: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub text: String,
    pub generated: bool,
    pub origin: ResponseOrigin,
    pub attempts: Vec<FailedAttempt>,
}

#[derive(Clone)]
pub struct Responder {
    backends: Vec<Arc<dyn GenerationBackend>>,
}

impl Responder {
    pub fn new(backends: Vec<Arc<dyn GenerationBackend>>) -> Self {
        Self { backends }
    }

    pub fn generative_enabled(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Backends en el orden en que se prueban.
    pub fn backends(&self) -> impl Iterator<Item = (BackendKind, &str)> + '_ {
        self.backends.iter().map(|b| (b.kind(), b.model()))
    }

    /// Nunca falla: cualquier error de backend se degrada a la siguiente etapa.
    pub async fn respond(&self, query: &str) -> Response {
        let mut attempts = Vec::new();

        for backend in &self.backends {
            let outcome = match backend.generate(query).await {
                Ok(text) if is_degenerate(&text) => {
                    Err(format!("respuesta vacía del modelo {}", backend.model()))
                }
                Ok(text) => Ok(text),
                Err(err) => Err(format!("{err:#}")),
            };

            match outcome {
                Ok(text) => {
                    info!("✅ Respuesta generada con {} ({:?})", backend.model(), backend.kind());
                    return Response {
                        text,
                        generated: true,
                        origin: ResponseOrigin::Model {
                            kind: backend.kind(),
                            model: backend.model().to_string(),
                        },
                        attempts,
                    };
                }
                Err(error) => {
                    warn!("⚠️ Falló {} ({:?}): {}", backend.model(), backend.kind(), error);
                    attempts.push(FailedAttempt {
                        kind: backend.kind(),
                        model: backend.model().to_string(),
                        error,
                    });
                }
            }
        }

        let (topic, text) = templates::fallback_response(query, &mut rand::thread_rng());
        info!(
            "Respuesta por plantilla (tema: {})",
            topic.map(Topic::as_str).unwrap_or("general")
        );
        Response {
            text,
            generated: false,
            origin: ResponseOrigin::Template { topic },
            attempts,
        }
    }
}

fn is_degenerate(text: &str) -> bool {
    text.trim().chars().count() <= MIN_RESPONSE_CHARS
}
