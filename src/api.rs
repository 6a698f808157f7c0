use axum::{
    extract::{Json, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app_state::{AppState, Status},
    config::EmbeddingProvider,
    ingest::IngestionSummary,
    llm::BackendKind,
    loaders::DocumentKind,
    responder::Response,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QueryPayload {
    query: String,
}

#[derive(Serialize)]
pub struct BackendInfo {
    kind: BackendKind,
    model: String,
}

#[derive(Serialize)]
pub struct ConfigInfo {
    token_configured: bool,
    masked_token: Option<String>,
    generative_backends: Vec<BackendInfo>,
    embedding_model: String,
    embedding_provider: EmbeddingProvider,
    accepted_extensions: Vec<&'static str>,
}

#[derive(Serialize, Default)]
pub struct DocumentListing {
    documents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(config_handler))
        .route("/api/query", post(query_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/documents", get(documents_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn config_handler(State(state): State<AppState>) -> Json<ConfigInfo> {
    Json(ConfigInfo {
        token_configured: state.config.hf_api_token.is_some(),
        masked_token: state.config.masked_token(),
        generative_backends: state
            .responder
            .backends()
            .map(|(kind, model)| BackendInfo {
                kind,
                model: model.to_string(),
            })
            .collect(),
        embedding_model: state.config.models.embedding_model.clone(),
        embedding_provider: state.config.models.embedding_provider,
        accepted_extensions: DocumentKind::ACCEPTED.to_vec(),
    })
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<Response>, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Por favor, introduce una consulta para recibir una respuesta.",
        ));
    }

    state.status.begin("🤖 Procesando consulta...");
    let response = state.responder.respond(query).await;
    state.status.finish(if response.generated {
        "✅ Respuesta generada por el modelo."
    } else {
        "✅ Respuesta generada con plantillas."
    });

    Ok(Json(response))
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestionSummary>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, format!("No se pudo leer el formulario: {e}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, format!("No se pudo leer el fichero: {e}"))
        })?;
        upload = Some((filename, bytes.to_vec()));
    }

    let (filename, bytes) = upload.ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, "No se ha proporcionado ningún fichero.")
    })?;

    state.status.begin(format!("🔄 Procesando documento '{filename}'..."));
    match state.ingestor.ingest_upload(&filename, bytes, &state.status).await {
        Ok(summary) => {
            state.status.finish(format!("✅ {summary}"));
            Ok(Json(summary))
        }
        Err(err) => {
            error!("Error de ingesta: {err}");
            state.status.finish(format!("❌ {err}"));
            let code = if err.is_rejection() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::UNPROCESSABLE_ENTITY
            };
            Err(api_error(code, err.to_string()))
        }
    }
}

#[axum::debug_handler]
async fn documents_handler(State(state): State<AppState>) -> Json<DocumentListing> {
    match state.store.list_sources().await {
        Ok(documents) if documents.is_empty() => Json(DocumentListing {
            message: Some("📚 Todavía no se ha subido ningún documento.".to_string()),
            ..Default::default()
        }),
        Ok(documents) => {
            info!("Listando {} registros del vector store", documents.len());
            Json(DocumentListing {
                documents,
                ..Default::default()
            })
        }
        Err(e) => {
            warn!("No se pudo leer el vector store: {e:#}");
            Json(DocumentListing {
                warning: Some("⚠️ No se pudieron recuperar los documentos almacenados.".to_string()),
                ..Default::default()
            })
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app_state::StatusHandle, config::AppConfig, ingest::Ingestor, llm::Embedder,
        responder::Responder, vector_store::VectorStore,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        fn model(&self) -> &str {
            "constant"
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }
    }

    async fn test_app(dir: &TempDir) -> (Router, AppState) {
        let vars: HashMap<String, String> = [
            ("UPLOAD_DIR", dir.path().join("upload")),
            ("VECTOR_DB_DIR", dir.path().join("db")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.display().to_string()))
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        let store = Arc::new(VectorStore::open(&config.vector_db_dir).await.unwrap());
        let ingestor = Arc::new(Ingestor::new(&config, store.clone(), Arc::new(ConstantEmbedder)));
        let state = AppState {
            config,
            responder: Responder::new(Vec::new()),
            ingestor,
            store,
            status: StatusHandle::new("Servidor listo."),
        };
        (create_router(state.clone()), state)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart_upload(filename: &str, content: &str) -> Request<Body> {
        multipart_upload_bytes(filename, content.as_bytes())
    }

    fn multipart_upload_bytes(filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--BOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");
        Request::post("/api/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn listing_without_uploads_is_informational() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(Request::get("/api/documents").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["documents"], json!([]));
        assert!(body["message"].is_string());
        assert!(body.get("warning").is_none());
    }

    #[tokio::test]
    async fn unreadable_store_degrades_to_warning() {
        let dir = TempDir::new().unwrap();
        let (app, state) = test_app(&dir).await;
        tokio::fs::write(state.store.path(), "garbage\n").await.unwrap();

        let response = app
            .oneshot(Request::get("/api/documents").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["warning"].is_string());
    }

    #[tokio::test]
    async fn query_without_token_uses_templates() {
        let dir = TempDir::new().unwrap();
        let (app, state) = test_app(&dir).await;

        let response = app
            .oneshot(
                Request::post("/api/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query":"How do I deploy on AWS?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["generated"], json!(false));
        assert_eq!(body["origin"]["type"], json!("template"));
        assert_eq!(body["origin"]["topic"], json!("cloud"));
        assert!(!state.status.snapshot().is_busy);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(
                Request::post("/api/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn uploaded_text_appears_in_listing() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .clone()
            .oneshot(multipart_upload("guide.txt", "Use an API gateway for client traffic."))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary = json_body(response).await;
        assert_eq!(summary["kind"], json!("txt"));
        assert_eq!(summary["chunks_created"], json!(1));

        let listing = app
            .oneshot(Request::get("/api/documents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(listing).await;
        let documents = body["documents"].as_array().unwrap();
        assert_eq!(documents.len(), 1);
        assert!(documents[0].as_str().unwrap().ends_with("guide.txt"));
    }

    #[tokio::test]
    async fn unsupported_upload_is_a_bad_request() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app.oneshot(multipart_upload("slides.pptx", "binary")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("pptx"));
    }

    #[tokio::test]
    async fn unreadable_text_is_unprocessable() {
        let dir = TempDir::new().unwrap();
        let (app, state) = test_app(&dir).await;

        let response = app
            .oneshot(multipart_upload_bytes("latin1.txt", &[b'c', b'a', 0xf1, b'a']))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("latin1.txt"));
        assert!(!state.status.snapshot().is_busy);
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn config_reports_fallback_mode() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;

        assert_eq!(body["token_configured"], json!(false));
        assert_eq!(body["generative_backends"], json!([]));
        assert_eq!(body["embedding_provider"], json!("local"));
        assert_eq!(body["accepted_extensions"], json!(["pdf", "txt", "docx"]));
    }
}
