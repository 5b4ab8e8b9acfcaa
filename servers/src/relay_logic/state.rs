use std::sync::Arc;

use lib_common::AlertStore;
use lib_common::core::Dispatcher;
use tokio_util::sync::CancellationToken;

/// Shared state of the relay backend's HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AlertStore>,
    pub dispatcher: Arc<Dispatcher>,
    /// Name reported by `/instancia`.
    pub instance: String,
    /// Name reported by `/quien-soy`, when configured.
    pub backend_name: Option<String>,
    pub shutdown: CancellationToken,
}
