//! Lifecycle and deadline handling for the configured generation backend.
//!
//! `Unloaded -> Loading -> Loaded`, or `-> Failed` when the backend cannot be
//! prepared; a failed manager retries the load on the next generation call.
//! Every generation runs in its own task awaited under a deadline. When the
//! deadline passes the task is detached, not aborted, and whatever it
//! eventually returns is dropped.

use crate::backends::build_backend;
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::{BackendKind, ModelInfo, ModelState, ModelStatus};
use crate::traits::{GenerationBackend, GenerationRequest};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const LOAD_FAILED_REPLY: &str =
    "Sorry, the language model could not be loaded. Check the generation settings and try again.";

/// Per-call overrides; `None` keeps the configured value.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed(String),
    TimedOut(Duration),
    Failed(String),
}

impl GenerationOutcome {
    /// User-facing text for this outcome.
    pub fn reply(&self) -> String {
        match self {
            GenerationOutcome::Completed(text) => text.clone(),
            GenerationOutcome::TimedOut(deadline) => format!(
                "Sorry, generating the answer took longer than {} seconds. Please try again or ask a shorter question.",
                deadline.as_secs_f32()
            ),
            GenerationOutcome::Failed(reason) => {
                format!("Sorry, an error occurred while generating the answer: {reason}")
            }
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            GenerationOutcome::Completed(_) => None,
            GenerationOutcome::TimedOut(deadline) => Some(format!(
                "generation timed out after {:.1}s",
                deadline.as_secs_f32()
            )),
            GenerationOutcome::Failed(reason) => Some(reason.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelAvailability {
    pub backend_kind: BackendKind,
    pub model_name: String,
    pub active: bool,
    pub available: bool,
}

pub struct GenerationManager {
    config: GenerationConfig,
    backend: Arc<dyn GenerationBackend>,
    state: RwLock<ModelState>,
    load_guard: Mutex<()>,
}

impl GenerationManager {
    pub fn new(config: GenerationConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        let state = ModelState {
            status: ModelStatus::Unloaded,
            backend_kind: backend.kind(),
            model_name: backend.model_name().to_string(),
            params: config.params(),
            last_error: None,
        };
        Self {
            config,
            backend,
            state: RwLock::new(state),
            load_guard: Mutex::new(()),
        }
    }

    /// Builds the backend named by the configuration.
    pub fn from_config(config: GenerationConfig) -> Result<Self, GenerationError> {
        let backend = build_backend(&config)?;
        Ok(Self::new(config, backend))
    }

    pub fn get_model_info(&self) -> ModelInfo {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.status() == ModelStatus::Loaded
    }

    fn status(&self) -> ModelStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    fn set_status(&self, status: ModelStatus, last_error: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.status = status;
        state.last_error = last_error;
    }

    /// Never raises; failure is recorded in the model state.
    pub async fn load(&self) -> bool {
        let _guard = self.load_guard.lock().await;
        if self.is_loaded() {
            return true;
        }

        self.set_status(ModelStatus::Loading, None);
        info!(
            backend = %self.backend.kind(),
            model = %self.backend.model_name(),
            "loading generation model"
        );

        match self.backend.load().await {
            Ok(()) => {
                self.set_status(ModelStatus::Loaded, None);
                info!(model = %self.backend.model_name(), "generation model loaded");
                true
            }
            Err(cause) => {
                error!(
                    model = %self.backend.model_name(),
                    reason = %cause,
                    "generation model failed to load"
                );
                self.set_status(ModelStatus::Failed, Some(cause.to_string()));
                false
            }
        }
    }

    pub async fn generate_outcome(
        &self,
        prompt: &str,
        system_prompt: &str,
        options: GenerationOptions,
    ) -> GenerationOutcome {
        if !self.is_loaded() && !self.load().await {
            let reason = self
                .get_model_info()
                .last_error
                .unwrap_or_else(|| LOAD_FAILED_REPLY.to_string());
            return GenerationOutcome::Failed(reason);
        }

        let deadline = options.timeout.unwrap_or_else(|| self.config.timeout());
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            system_prompt: system_prompt.to_string(),
            temperature: options.temperature.unwrap_or(self.config.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
        };

        let backend = Arc::clone(&self.backend);
        let task = tokio::spawn(async move { backend.generate(&request).await });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(text))) => GenerationOutcome::Completed(text),
            Ok(Ok(Err(cause))) => {
                error!(reason = %cause, "generation failed");
                GenerationOutcome::Failed(cause.to_string())
            }
            Ok(Err(join_error)) => {
                error!(reason = %join_error, "generation task aborted");
                GenerationOutcome::Failed(
                    GenerationError::TaskAborted(join_error.to_string()).to_string(),
                )
            }
            // Dropping the JoinHandle here detaches the task.
            Err(_) => {
                warn!(deadline_secs = deadline.as_secs_f32(), "generation deadline exceeded");
                GenerationOutcome::TimedOut(deadline)
            }
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        options: GenerationOptions,
    ) -> String {
        self.generate_outcome(prompt, system_prompt, options)
            .await
            .reply()
    }

    /// The active backend plus the other configured kind, each with a
    /// best-effort usability check.
    pub async fn available_models(&self) -> Vec<ModelAvailability> {
        let mut models = vec![ModelAvailability {
            backend_kind: self.backend.kind(),
            model_name: self.backend.model_name().to_string(),
            active: true,
            available: self.backend.is_available().await,
        }];

        let other_kind = match self.backend.kind() {
            BackendKind::Remote => BackendKind::Local,
            BackendKind::Local => BackendKind::Remote,
        };
        let alternative = GenerationConfig {
            backend: other_kind,
            model_name: None,
            endpoint: None,
            ..self.config.clone()
        };
        match build_backend(&alternative) {
            Ok(backend) => models.push(ModelAvailability {
                backend_kind: other_kind,
                model_name: backend.model_name().to_string(),
                active: false,
                available: backend.is_available().await,
            }),
            Err(cause) => warn!(
                backend = %other_kind,
                reason = %cause,
                "could not check alternative backend"
            ),
        }

        models
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    /// Scripted backend shared by the generation and orchestrator tests.
    pub(crate) struct ScriptedBackend {
        pub reply: String,
        pub delay: Duration,
        pub load_delay: Duration,
        pub fail_load: AtomicBool,
        pub fail_generate: bool,
        pub loads: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                delay: Duration::ZERO,
                load_delay: Duration::ZERO,
                fail_load: AtomicBool::new(false),
                fail_generate: false,
                loads: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn load(&self) -> Result<(), GenerationError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if !self.load_delay.is_zero() {
                tokio::time::sleep(self.load_delay).await;
            }
            if self.fail_load.load(Ordering::SeqCst) {
                return Err(GenerationError::Load("weights missing".to_string()));
            }
            Ok(())
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_generate {
                return Err(GenerationError::Request("backend exploded".to_string()));
            }
            Ok(format!("{} ({} chars)", self.reply, request.prompt.len()))
        }

        async fn is_available(&self) -> bool {
            !self.fail_load.load(Ordering::SeqCst)
        }
    }

    fn manager(backend: Arc<ScriptedBackend>) -> GenerationManager {
        GenerationManager::new(GenerationConfig::default(), backend)
    }

    #[tokio::test]
    async fn model_info_tracks_load() {
        let manager = manager(Arc::new(ScriptedBackend::replying("ok")));

        let before = manager.get_model_info();
        assert_eq!(before.status, ModelStatus::Unloaded);
        assert_eq!(before.model_name, "scripted");
        assert_eq!(before.backend_kind, BackendKind::Local);

        assert!(manager.load().await);
        let after = manager.get_model_info();
        assert_eq!(after.status, ModelStatus::Loaded);
        assert_eq!(after.params, GenerationConfig::default().params());
    }

    #[tokio::test]
    async fn failed_load_is_recorded_and_retried() {
        let backend = Arc::new(ScriptedBackend::replying("ok"));
        backend.fail_load.store(true, Ordering::SeqCst);
        let manager = manager(Arc::clone(&backend));

        assert!(!manager.load().await);
        let info = manager.get_model_info();
        assert_eq!(info.status, ModelStatus::Failed);
        assert!(info.last_error.as_deref().unwrap_or_default().contains("weights missing"));

        let outcome = manager
            .generate_outcome("q", "s", GenerationOptions::default())
            .await;
        assert!(matches!(outcome, GenerationOutcome::Failed(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        backend.fail_load.store(false, Ordering::SeqCst);
        assert_eq!(
            manager.generate("q", "s", GenerationOptions::default()).await,
            "ok (1 chars)"
        );
        assert_eq!(backend.loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn generate_loads_once_on_demand() {
        let backend = Arc::new(ScriptedBackend::replying("answer"));
        let manager = manager(Arc::clone(&backend));

        manager.generate("first", "s", GenerationOptions::default()).await;
        manager.generate("second", "s", GenerationOptions::default()).await;

        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deadline_bounds_slow_generation() {
        let backend = Arc::new(ScriptedBackend {
            delay: Duration::from_secs(30),
            ..ScriptedBackend::replying("late")
        });
        let manager = manager(backend);
        let deadline = Duration::from_millis(100);

        let started = Instant::now();
        let outcome = manager
            .generate_outcome(
                "q",
                "s",
                GenerationOptions {
                    timeout: Some(deadline),
                    ..GenerationOptions::default()
                },
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome, GenerationOutcome::TimedOut(deadline));
        assert!(outcome.reply().starts_with("Sorry, generating the answer took longer"));
        assert!(outcome.error().is_some());
    }

    #[tokio::test]
    async fn concurrent_first_requests_share_one_load() {
        let backend = Arc::new(ScriptedBackend {
            load_delay: Duration::from_millis(200),
            ..ScriptedBackend::replying("pressure is 12 bar")
        });
        let manager = manager(Arc::clone(&backend));

        let (first, second) = tokio::join!(
            manager.generate("first", "s", GenerationOptions::default()),
            manager.generate("second", "s", GenerationOptions::default()),
        );

        assert!(first.starts_with("pressure is 12 bar"));
        assert!(second.starts_with("pressure is 12 bar"));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_loaded());
    }

    #[tokio::test]
    async fn backend_errors_become_text() {
        let backend = Arc::new(ScriptedBackend {
            fail_generate: true,
            ..ScriptedBackend::replying("unused")
        });
        let manager = manager(backend);

        let reply = manager.generate("q", "s", GenerationOptions::default()).await;
        assert!(reply.contains("backend exploded"));
        assert!(manager.is_loaded());
    }

    #[tokio::test]
    async fn available_models_lists_active_backend_first() {
        let manager = manager(Arc::new(ScriptedBackend::replying("ok")));
        let models = manager.available_models().await;

        assert_eq!(models.len(), 2);
        assert!(models[0].active);
        assert!(models[0].available);
        assert_eq!(models[0].model_name, "scripted");
        assert_eq!(models[1].backend_kind, BackendKind::Remote);
        assert!(!models[1].active);
    }
}
