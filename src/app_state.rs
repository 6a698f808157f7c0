use std::sync::{Arc, Mutex, MutexGuard};

use crate::{config::AppConfig, ingest::Ingestor, responder::Responder, vector_store::VectorStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub responder: Responder,
    pub ingestor: Arc<Ingestor>,
    pub store: Arc<VectorStore>,
    pub status: StatusHandle,
}

/// Última línea de estado visible en la interfaz.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

/// Estado compartido entre peticiones.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<Mutex<Status>>);

impl StatusHandle {
    pub fn new(message: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(Status {
            is_busy: false,
            message: message.into(),
            progress: 0.0,
        })))
    }

    // Un pánico con el lock tomado no debe dejar la interfaz sin estado.
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Status {
        self.lock().clone()
    }

    pub fn begin(&self, message: impl Into<String>) {
        let mut status = self.lock();
        status.is_busy = true;
        status.message = message.into();
        status.progress = 0.0;
    }

    pub fn progress(&self, message: impl Into<String>, progress: f32) {
        let mut status = self.lock();
        status.message = message.into();
        status.progress = progress.clamp(0.0, 1.0);
    }

    pub fn finish(&self, message: impl Into<String>) {
        let mut status = self.lock();
        status.is_busy = false;
        status.message = message.into();
        status.progress = 0.0;
    }
}
