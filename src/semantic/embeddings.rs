//! Embedding capability and its fastembed-backed implementation.
//!
//! Catalog documents and hiring queries go through the same model so their
//! vectors are comparable. The fastembed model is loaded once, under a
//! deadline, and cached in `<data_dir>/models`.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Accepted model names (lowercase, with and without separators).
const SUPPORTED_MODELS: &[(&str, &str, fastembed::EmbeddingModel)] = &[
    ("all-minilm-l6-v2", "allminiml6v2", fastembed::EmbeddingModel::AllMiniLML6V2),
    ("all-mpnet-base-v2", "allmpnetbasev2", fastembed::EmbeddingModel::AllMpnetBaseV2),
    ("bge-small-en-v1.5", "bgesmallenv15", fastembed::EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", "bgebaseenv15", fastembed::EmbeddingModel::BGEBaseENV15),
    ("bge-large-en-v1.5", "bgelargeenv15", fastembed::EmbeddingModel::BGELargeENV15),
];

/// Maps text to fixed-length vectors.
///
/// Implementations must return vectors of `dimensions()` length for every
/// input and must be deterministic for the lifetime of the instance.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// SHA256 of the model name, used to tie a persisted index to its model.
    fn model_id_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        hasher.finalize().into()
    }
}

/// fastembed `TextEmbedding` behind a Mutex, its `embed` takes `&mut self`.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Model download did not finish within {0}s")]
    DownloadTimeout(u64),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

impl EmbeddingModel {
    /// Load `model_name`, downloading it into `<cache_dir>/models` when it is
    /// not cached yet. Loading that exceeds `download_timeout` fails with
    /// `DownloadTimeout`; the abandoned download keeps running on its own
    /// thread until it finishes or the process exits.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {e}"))
        })?;

        log::info!("loading embedding model '{model_name}' from {}", models_dir.display());
        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let (model, dimensions) = with_deadline(timeout, move || {
            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
            let dimensions = Self::probe_dimensions(&mut model)?;
            Ok((model, dimensions))
        })?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        let wanted = name.to_lowercase();
        SUPPORTED_MODELS
            .iter()
            .find(|(dashed, compact, _)| wanted == *dashed || wanted == *compact)
            .map(|(_, _, model)| model.clone())
            .ok_or_else(|| {
                let known: Vec<&str> =
                    SUPPORTED_MODELS.iter().map(|(dashed, _, _)| *dashed).collect();
                EmbeddingError::InvalidModel(format!(
                    "Unknown model: {name}. Supported models: {}",
                    known.join(", ")
                ))
            })
    }

    /// Embed a single word to learn the vector length.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let probe = model
            .embed(vec!["assessment"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {e}")))?;

        match probe.first() {
            Some(vector) if !vector.is_empty() => Ok(vector.len()),
            _ => Err(EmbeddingError::InitFailed("Model returned no embedding".to_string())),
        }
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        self.model
            .lock()
            .map_err(|e| EmbeddingError::EmbeddingFailed(format!("Model lock poisoned: {e}")))
    }
}

/// Run `load` on its own thread and give up after `timeout`.
fn with_deadline<T, F>(timeout: Duration, load: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("embedding-model-load".to_string())
        .spawn(move || {
            // receiver is gone once the deadline passed
            let _ = tx.send(load());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to spawn loader thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader thread panicked".to_string(),
        )),
    }
}

impl EmbeddingProvider for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.locked()?
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.locked()?
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}
