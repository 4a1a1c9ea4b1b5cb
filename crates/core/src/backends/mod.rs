mod local;
mod remote;

pub use local::LocalModelBackend;
pub use remote::RemoteChatBackend;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::BackendKind;
use crate::traits::GenerationBackend;
use std::sync::Arc;
use std::time::Duration;

/// Selects the single backend named by `config.backend`.
pub fn build_backend(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationBackend>, GenerationError> {
    let request_timeout = config.timeout().max(Duration::from_secs(1));
    let backend: Arc<dyn GenerationBackend> = match config.backend {
        BackendKind::Remote => Arc::new(RemoteChatBackend::new(
            config.resolved_endpoint(),
            config.api_key.clone(),
            config.resolved_model_name(),
            request_timeout,
        )?),
        BackendKind::Local => Arc::new(LocalModelBackend::new(
            config.resolved_endpoint(),
            config.resolved_model_name(),
            request_timeout,
        )?),
    };
    Ok(backend)
}
