use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::{debug, info, warn};

use crate::{
    embedding::{Embedder, normalize},
    error::{Error, Result},
    run_blocking,
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "STORECHAT_MODEL";

/// Set to `off` (or `0`, `false`) to start with embeddings disabled.
pub const EMBEDDINGS_ENV_VAR: &str = "STORECHAT_EMBEDDINGS";

const FEATURE: &str = "embeddings";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Pick the model id: explicit flag, then environment, then the stored
/// setting, then [`DEFAULT_MODEL_ID`].
pub fn resolve_model_id(
    explicit: Option<&str>,
    env: Option<String>,
    stored: Option<String>,
) -> String {
    explicit
        .map(str::to_string)
        .or(env)
        .or(stored)
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

enum ModelState {
    Unloaded,
    Ready(Box<ColBERT>),
    Disabled(String),
}

struct ModelSlot {
    model_id: String,
    state: Mutex<ModelState>,
    disabled: AtomicBool,
}

/// Process-wide ColBERT embedding provider.
///
/// The model is loaded on the first call to [`Embedder::embed`] and shared
/// by every clone afterwards. If loading fails the manager is disabled for
/// the rest of the process and every call fails fast with
/// [`Error::Unavailable`].
#[derive(Clone)]
pub struct ModelManager {
    slot: Arc<ModelSlot>,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `STORECHAT_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`lightonai/GTE-ModernColBERT-v1`)
    ///
    /// `STORECHAT_EMBEDDINGS=off` yields a disabled manager.
    pub fn new() -> Self {
        Self::for_model(resolve_model_id(
            None,
            std::env::var(MODEL_ENV_VAR).ok(),
            None,
        ))
    }

    /// Creates a manager for `model_id`, honouring the
    /// `STORECHAT_EMBEDDINGS` switch.
    pub fn for_model(model_id: String) -> Self {
        let switched_off = std::env::var(EMBEDDINGS_ENV_VAR)
            .map(|v| matches!(v.trim(), "off" | "0" | "false"))
            .unwrap_or(false);

        if switched_off {
            Self::disabled(model_id, format!("{EMBEDDINGS_ENV_VAR} is off"))
        } else {
            Self::with_model_id(model_id)
        }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self::from_state(model_id, ModelState::Unloaded, false)
    }

    /// Creates a manager that is already disabled.
    pub fn disabled(model_id: String, reason: String) -> Self {
        Self::from_state(model_id, ModelState::Disabled(reason), true)
    }

    fn from_state(model_id: String, state: ModelState, disabled: bool) -> Self {
        Self {
            slot: Arc::new(ModelSlot {
                model_id,
                state: Mutex::new(state),
                disabled: AtomicBool::new(disabled),
            }),
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.slot.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.slot
            .state
            .lock()
            .map(|state| matches!(*state, ModelState::Ready(_)))
            .unwrap_or(false)
    }

    pub fn is_disabled(&self) -> bool {
        self.slot.disabled.load(Ordering::Acquire)
    }

    fn unavailable(&self, reason: impl Into<String>) -> Error {
        Error::Unavailable {
            feature: FEATURE,
            reason: reason.into(),
        }
    }

    /// Loads the model if needed and embeds `text` on the calling thread.
    fn encode_blocking(&self, text: &str) -> Result<Vec<f32>> {
        if self.is_disabled() {
            return Err(self.unavailable(format!(
                "model {} is disabled",
                self.slot.model_id
            )));
        }

        let mut state = self
            .slot
            .state
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".to_string()))?;

        if matches!(*state, ModelState::Unloaded) {
            *state = self.load();
        }

        match &mut *state {
            ModelState::Ready(model) => embed_with(model, text),
            ModelState::Disabled(reason) => Err(self.unavailable(reason.clone())),
            ModelState::Unloaded => {
                Err(Error::Embedding("model not loaded".to_string()))
            }
        }
    }

    /// Downloads (if needed) and loads the model. A failure permanently
    /// disables this manager.
    fn load(&self) -> ModelState {
        let model_id = self.slot.model_id.as_str();
        info!(model = model_id, "loading embedding model");

        let loaded: std::result::Result<ColBERT, _> = ColBERT::from(model_id)
            .with_device(default_device())
            .try_into();

        match loaded {
            Ok(model) => {
                info!(model = model_id, "embedding model ready");
                ModelState::Ready(Box::new(model))
            }
            Err(e) => {
                let reason = format!("failed to load model {model_id}: {e}");
                warn!("{reason}; embeddings disabled until restart");
                self.slot.disabled.store(true, Ordering::Release);
                ModelState::Disabled(reason)
            }
        }
    }
}

#[async_trait]
impl Embedder for ModelManager {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.is_disabled() {
            return Err(self.unavailable(format!(
                "model {} is disabled",
                self.slot.model_id
            )));
        }

        let manager = self.clone();
        let text = text.to_string();
        run_blocking(move || manager.encode_blocking(&text)).await
    }

    fn is_available(&self) -> bool {
        !self.is_disabled()
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.slot.model_id)
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}

fn embed_with(model: &mut ColBERT, text: &str) -> Result<Vec<f32>> {
    let embeddings = model
        .encode(&[text.to_string()], false)
        .map_err(|e| Error::Embedding(format!("encoding failed: {e}")))?;
    let vector = mean_pool(&embeddings)?;
    debug!(dimension = vector.len(), "embedded text");
    Ok(vector)
}

/// Collapse ColBERT token embeddings `[1, T, D]` into one unit vector `[D]`.
fn mean_pool(embeddings: &Tensor) -> Result<Vec<f32>> {
    let mut vector = embeddings
        .squeeze(0)
        .and_then(|tokens| tokens.mean(0))
        .and_then(|pooled| pooled.to_vec1::<f32>())
        .map_err(map_candle_err)?;
    normalize(&mut vector);
    Ok(vector)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::Embedding(format!("tensor computation error: {e}"))
}
