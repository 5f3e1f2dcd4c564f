use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::llm::ProviderKind;
use crate::recommend::{SynthesizerConfig, DEFAULT_TARGET_COUNT};
use crate::semantic::{Metric, DEFAULT_MODEL, DEFAULT_RETRIEVAL_K, DEFAULT_SIMILARITY_FLOOR};
use crate::storage::BackendLocal;

const CONFIG_FILE: &str = "config.yaml";
const VECTORS_FILE: &str = "vectors.bin";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Resolve the data directory: explicit flag, then `ASSESSREC_BASE_PATH`,
/// then `~/.local/share/assessrec`.
pub fn resolve_base_path(flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }

    if let Ok(path) = std::env::var("ASSESSREC_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("Could not determine home directory")?
        .context("Home directory path is empty")?;
    Ok(home.join(".local/share/assessrec"))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "bge-base-en-v1.5")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Documents embedded per batch while building the index
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,

    /// Candidates below this similarity are never shown. `null` disables.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: Option<f32>,

    #[serde(default)]
    pub metric: Metric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_RETRIEVAL_K,
            similarity_floor: default_similarity_floor(),
            metric: Metric::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_max_repairs")]
    pub max_repairs: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_repairs: default_max_repairs(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_k() -> usize {
    DEFAULT_RETRIEVAL_K
}

fn default_similarity_floor() -> Option<f32> {
    Some(DEFAULT_SIMILARITY_FLOOR)
}

fn default_provider() -> ProviderKind {
    ProviderKind::Gemini
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    1
}

fn default_max_repairs() -> usize {
    2
}

fn default_max_tokens() -> usize {
    2048
}

fn default_catalog_path() -> String {
    "data.csv".to_string()
}

fn default_target_count() -> usize {
    DEFAULT_TARGET_COUNT
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Catalog CSV, relative to the data directory unless absolute
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            target_count: default_target_count(),
            listen_addr: default_listen_addr(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retrieval.k == 0 {
            bail!("retrieval.k must be greater than 0");
        }

        if let Some(floor) = self.retrieval.similarity_floor {
            if !(-1.0..=1.0).contains(&floor) {
                bail!("retrieval.similarity_floor must be between -1.0 and 1.0, got {floor}");
            }
        }

        if self.target_count == 0 {
            bail!("target_count must be greater than 0");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }

        if self.embedding.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        if self.generation.timeout_secs == 0 {
            bail!("generation.timeout_secs must be greater than 0");
        }

        if self.generation.api_key_env.trim().is_empty() {
            bail!("generation.api_key_env must name an environment variable");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults when
    /// missing and re-saving it when defaults were filled in.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = BackendLocal::new(base_path)
            .with_context(|| format!("Failed to create data directory {}", base_path.display()))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store
                .write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())
                .context("Failed to write default config")?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = BackendLocal::new(&self.base_path)?;
        let config_str = serde_yml::to_string(&self)?;
        store
            .write(CONFIG_FILE, config_str.as_bytes())
            .context("Failed to save config")?;
        Ok(())
    }

    /// Point the config at a data directory without touching the disk.
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn catalog_path(&self) -> PathBuf {
        let path = Path::new(&self.catalog_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.base_path.join(VECTORS_FILE)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.download_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    /// Read the generation API key from the configured environment variable.
    pub fn api_key(&self) -> anyhow::Result<String> {
        let name = &self.generation.api_key_env;
        std::env::var(name).with_context(|| format!("{name} is not set"))
    }

    pub fn synthesizer_config(&self) -> SynthesizerConfig {
        SynthesizerConfig {
            target_count: self.target_count,
            timeout: self.generation_timeout(),
            max_retries: self.generation.max_retries,
            max_repairs: self.generation.max_repairs,
            max_tokens: self.generation.max_tokens,
        }
    }
}
