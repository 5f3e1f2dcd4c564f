//! Service facade: one-time pipeline initialization plus the `recommend`
//! entry point shared by the HTTP and CLI surfaces.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use anyhow::Context;

use crate::catalog::{Catalog, DocumentId};
use crate::config::Config;
use crate::llm::{build_provider, GenerativeProvider};
use crate::recommend::{RecommendationResponse, Synthesis, Synthesizer};
use crate::semantic::{
    EmbeddingModel, EmbeddingProvider, RetrievalError, Retriever, VectorIndex, VectorStorage,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("query text is empty")]
    InvalidQuery,

    #[error("index is not ready yet, retry later")]
    IndexNotReady,

    #[error("retrieval failed")]
    RetrievalFailure,

    #[error("service is already initialized")]
    AlreadyInitialized,

    #[error("initialization failed: {0}")]
    InitFailed(String),
}

/// Everything a request needs, immutable once built.
struct Pipeline {
    catalog: Arc<Catalog>,
    retriever: Arc<Retriever>,
    synthesizer: Synthesizer,
}

/// Explicitly constructed service state.
///
/// Starts not ready; `init` builds the pipeline exactly once. Requests made
/// before that fail fast with `IndexNotReady`, requests made after a failed
/// initialization with `InitFailed`. Dropping the context releases
/// everything.
pub struct ServiceContext {
    config: Config,
    pipeline: OnceLock<Arc<Pipeline>>,
    init_error: OnceLock<String>,
    init_guard: Mutex<()>,
}

impl ServiceContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pipeline: OnceLock::new(),
            init_error: OnceLock::new(),
            init_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.get().is_some()
    }

    /// Why initialization failed, if it did and never succeeded afterwards.
    pub fn init_error(&self) -> Option<&str> {
        if self.is_ready() {
            return None;
        }
        self.init_error.get().map(String::as_str)
    }

    fn record_failure(&self, message: String) {
        log::error!("initialization failed: {message}");
        // first failure wins
        let _ = self.init_error.set(message);
    }

    /// Number of indexed documents, 0 before initialization.
    pub fn document_count(&self) -> usize {
        self.pipeline.get().map_or(0, |p| p.catalog.len())
    }

    /// Embed the catalog, build (or load) the index and make the service
    /// ready. Blocking; call from a blocking context.
    pub fn init(
        &self,
        catalog: Catalog,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerativeProvider>,
    ) -> Result<(), ServiceError> {
        let _guard = self
            .init_guard
            .lock()
            .map_err(|e| ServiceError::InitFailed(format!("Lock poisoned: {e}")))?;

        if self.pipeline.get().is_some() {
            return Err(ServiceError::AlreadyInitialized);
        }

        let now = Instant::now();
        let index = self
            .load_or_build_index(&catalog, embedder.as_ref())
            .inspect_err(|e| self.record_failure(e.to_string()))?;
        log::info!(
            "index ready: {} vectors ({} dimensions) in {}ms",
            index.len(),
            index.dimensions(),
            now.elapsed().as_millis()
        );

        let catalog = Arc::new(catalog);
        let retriever = Retriever::new(
            embedder,
            Arc::new(index),
            catalog.clone(),
            self.config.retrieval.similarity_floor,
        );
        let synthesizer = Synthesizer::new(generator, self.config.synthesizer_config());

        let pipeline = Arc::new(Pipeline {
            catalog,
            retriever: Arc::new(retriever),
            synthesizer,
        });

        self.pipeline
            .set(pipeline)
            .map_err(|_| ServiceError::AlreadyInitialized)
    }

    /// Load the catalog, the embedding model and the configured generative
    /// provider, then `init`. Blocking; downloads the model on first use.
    ///
    /// A failure is remembered and reported by later requests.
    pub fn init_from_config(&self) -> anyhow::Result<()> {
        let result = self.load_and_init();
        if let Err(e) = &result {
            let repeated = matches!(
                e.downcast_ref::<ServiceError>(),
                Some(ServiceError::AlreadyInitialized | ServiceError::InitFailed(_))
            );
            if !repeated {
                self.record_failure(format!("{e:#}"));
            }
        }
        result
    }

    fn load_and_init(&self) -> anyhow::Result<()> {
        let config = &self.config;

        let catalog = Catalog::load_csv(&config.catalog_path())?;

        let embedder = EmbeddingModel::new(
            &config.embedding.model,
            config.base_path().to_path_buf(),
            Some(config.download_timeout()),
        )
        .context("Failed to load embedding model")?;

        let generator = build_provider(
            config.generation.provider,
            config.api_key()?,
            config.generation.model.clone(),
            config.generation_timeout(),
        )
        .context("Failed to build generative provider")?;

        self.init(catalog, Arc::new(embedder), Arc::from(generator))?;
        Ok(())
    }

    /// Recommend assessments for a free-text hiring query.
    pub async fn recommend(&self, text: &str) -> Result<RecommendationResponse, ServiceError> {
        Ok(self.synthesize(text).await?.response)
    }

    /// Like `recommend`, also reporting whether the fallback ranking was used.
    pub async fn synthesize(&self, text: &str) -> Result<Synthesis, ServiceError> {
        let query = text.trim().to_string();
        if query.is_empty() {
            return Err(ServiceError::InvalidQuery);
        }

        let Some(pipeline) = self.pipeline.get().cloned() else {
            return Err(match self.init_error.get() {
                Some(reason) => ServiceError::InitFailed(reason.clone()),
                None => ServiceError::IndexNotReady,
            });
        };

        let retriever = pipeline.retriever.clone();
        let k = self.config.retrieval.k;
        let blocking_query = query.clone();
        let retrieval = tokio::task::spawn_blocking(move || retriever.retrieve(&blocking_query, k))
            .await
            .map_err(|e| {
                log::error!("retrieval task failed: {e}");
                ServiceError::RetrievalFailure
            })?
            .map_err(|e| match e {
                RetrievalError::InvalidQuery => ServiceError::InvalidQuery,
                other => {
                    log::error!("retrieval failed: {other}");
                    ServiceError::RetrievalFailure
                }
            })?;

        Ok(pipeline.synthesizer.synthesize(&query, &retrieval).await)
    }

    /// Persisted vectors are reused when model, catalog and metric match;
    /// anything else triggers a full rebuild.
    pub fn load_or_build_index(
        &self,
        catalog: &Catalog,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<VectorIndex, ServiceError> {
        let metric = self.config.retrieval.metric;
        let model_id = embedder.model_id_hash();
        let fingerprint = catalog.fingerprint();
        let storage = self.index_storage();

        if let Some(storage) = storage.as_ref().filter(|s| s.exists()) {
            match storage.load(&model_id, &fingerprint, embedder.dimensions()) {
                Ok(index) if index.metric() == metric => {
                    log::info!("Loaded {} vectors from storage", index.len());
                    return Ok(index);
                }
                Ok(_) => log::warn!("Metric changed, rebuilding index"),
                Err(e) if e.is_stale() => log::warn!("Stored vectors are stale ({e}), rebuilding"),
                Err(e) => log::error!("Failed to load vectors ({e}), rebuilding"),
            }
        }

        let index = build_index(catalog, embedder, self.config.embedding.batch_size, metric)?;

        if let Some(storage) = storage {
            match storage.save(&index, &model_id, &fingerprint) {
                Ok(()) => log::info!(
                    "Saved {} vectors to {}",
                    index.len(),
                    storage.path().display()
                ),
                Err(e) => log::warn!("Failed to persist vectors: {e}"),
            }
        }

        Ok(index)
    }

    /// Vectors are only persisted when the config points at a data directory.
    fn index_storage(&self) -> Option<VectorStorage> {
        if self.config.base_path().as_os_str().is_empty() {
            None
        } else {
            Some(VectorStorage::new(self.config.vectors_path()))
        }
    }
}

/// Embed every document in batches and build the index.
pub fn build_index(
    catalog: &Catalog,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
    metric: crate::semantic::Metric,
) -> Result<VectorIndex, ServiceError> {
    let dimensions = embedder.dimensions();
    if catalog.is_empty() {
        log::warn!("catalog is empty, every query will get an empty response");
        return Ok(VectorIndex::empty(dimensions, metric));
    }

    let mut entries: Vec<(DocumentId, Vec<f32>)> = Vec::with_capacity(catalog.len());
    for batch in catalog.documents().chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|doc| doc.content.clone()).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .map_err(|e| ServiceError::InitFailed(e.to_string()))?;

        if embeddings.len() != batch.len() {
            return Err(ServiceError::InitFailed(format!(
                "embedder returned {} vectors for {} documents",
                embeddings.len(),
                batch.len()
            )));
        }

        entries.extend(batch.iter().map(|doc| doc.id).zip(embeddings));
        log::debug!("embedded {}/{} documents", entries.len(), catalog.len());
    }

    VectorIndex::build(dimensions, metric, entries)
        .map_err(|e| ServiceError::InitFailed(e.to_string()))
}
