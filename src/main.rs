// Módulos de la aplicación
mod api;
mod app_state;
mod chunking;
mod config;
mod embeddings;
mod ingest;
mod llm;
mod loaders;
mod responder;
mod templates;
mod vector_store;

use std::sync::Arc;

use anyhow::Context;
use axum::{extract::DefaultBodyLimit, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, StatusHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    match cfg.masked_token() {
        Some(token) => info!("🔑 Token de Hugging Face configurado ({token}): se usarán modelos externos."),
        None => warn!("⚠️ HUGGINGFACE_API_TOKEN no encontrado: se usarán respuestas predefinidas."),
    }

    // 3. Abrir el vector store y asegurar el directorio de subidas
    let store = Arc::new(
        vector_store::VectorStore::open(&cfg.vector_db_dir)
            .await
            .context("Error abriendo el vector store")?,
    );
    match store.count().await {
        Ok(count) => info!("📚 Vector store con {count} registros."),
        Err(e) => warn!("No se pudo leer el vector store: {e:#}"),
    }
    tokio::fs::create_dir_all(&cfg.upload_dir)
        .await
        .with_context(|| format!("Error creando {}", cfg.upload_dir.display()))?;

    // 4. Inicializar gestor de LLMs, respondedor e ingestor
    let llm_manager = llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;
    let responder = responder::Responder::new(llm_manager.backends.clone());
    let ingestor = Arc::new(ingest::Ingestor::new(&cfg, store.clone(), llm_manager.embedder.clone()));
    if responder.generative_enabled() {
        for (kind, model) in responder.backends() {
            info!("Backend generativo {:?}: {}", kind, model);
        }
    }
    info!(
        "Subidas en {}, embeddings con {} ({:?})",
        ingestor.upload_dir().display(),
        llm_manager.embedder.model(),
        llm_manager.embedding_provider
    );

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        responder,
        ingestor,
        store,
        status: StatusHandle::new("Servidor listo."),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
