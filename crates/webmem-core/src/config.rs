//! Layered configuration.
//!
//! Resolution order, per field: explicit TOML file value -> environment
//! variable override -> built-in default. Mirrors the `resolve_*` pattern
//! used for the deep-research sub-config in the example pack's scraping
//! service, generalized to every tunable this engine exposes.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EnrichmentFileConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub llm_model: Option<String>,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingFileConfig {
    pub dimension: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreFileConfig {
    pub path: Option<String>,
    pub staleness_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VectorFileConfig {
    pub soft_cap: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheFileConfig {
    pub capacity: Option<usize>,
    pub ttl_days: Option<i64>,
    pub persistence_path: Option<String>,
    pub persist_every_n_mutations: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EvictionFileConfig {
    pub capacity: Option<usize>,
    pub headroom: Option<usize>,
    pub protect_window_minutes: Option<i64>,
    pub random_trigger_probability: Option<f64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SearchFileConfig {
    pub max_results: Option<usize>,
    pub semantic_weight: Option<f64>,
    pub keyword_weight: Option<f64>,
    pub freq_weight: Option<f64>,
    pub drop_ratio: Option<f64>,
    pub min_absolute: Option<f64>,
    pub k_lexical: Option<usize>,
}

/// Raw `webmem.toml` shape. Every field is optional: anything absent falls
/// back to an environment variable, then a built-in default.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub enrichment: EnrichmentFileConfig,
    pub embedding: EmbeddingFileConfig,
    pub store: StoreFileConfig,
    pub vector: VectorFileConfig,
    pub cache: CacheFileConfig,
    pub eviction: EvictionFileConfig,
    pub search: SearchFileConfig,
}

impl ConfigFile {
    /// Load from a TOML file on disk. Returns the default (empty) config if
    /// the file does not exist — config is optional, env vars and defaults
    /// still apply.
    pub fn load(path: &Path) -> anyhow_free::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let parsed: ConfigFile = toml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(parsed)
    }
}

/// Tiny local alias so this module doesn't need to depend on `anyhow` just
/// for one fallible loader — the library surfaces typed errors elsewhere.
mod anyhow_free {
    pub type Result<T> = std::result::Result<T, std::io::Error>;
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse().ok())
}

/// Fully resolved configuration, with every field's default applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub enrichment_endpoint: Option<String>,
    pub enrichment_token: Option<String>,
    pub enrichment_timeout_secs: u64,
    pub enrichment_retries: u32,
    pub enrichment_llm_model: String,
    pub enrichment_embedding_model: String,

    pub embedding_dimension: usize,

    pub store_path: PathBuf,
    pub store_staleness_days: i64,

    pub vector_soft_cap: usize,

    pub cache_capacity: usize,
    pub cache_ttl_days: i64,
    pub cache_persistence_path: PathBuf,
    pub cache_persist_every_n_mutations: u32,

    pub eviction_capacity: usize,
    pub eviction_headroom: usize,
    pub eviction_protect_window_minutes: i64,
    pub eviction_random_trigger_probability: f64,
    pub eviction_sweep_interval_secs: u64,

    pub search_max_results: usize,
    pub search_semantic_weight: f64,
    pub search_keyword_weight: f64,
    pub search_freq_weight: f64,
    pub search_drop_ratio: f64,
    pub search_min_absolute: f64,
    pub search_k_lexical: usize,
}

impl Config {
    /// Resolve a full `Config` from a parsed file plus environment, falling
    /// back to the built-in reference defaults for any field left unset.
    pub fn resolve(file: &ConfigFile) -> Self {
        let data_dir = default_data_dir();

        Self {
            enrichment_endpoint: file
                .enrichment
                .endpoint
                .clone()
                .or_else(|| env_str("WEBMEM_ENRICHMENT_ENDPOINT")),
            enrichment_token: file
                .enrichment
                .token
                .clone()
                .or_else(|| env_str("WEBMEM_ENRICHMENT_TOKEN")),
            enrichment_timeout_secs: file
                .enrichment
                .timeout_secs
                .or_else(|| env_parsed("WEBMEM_ENRICHMENT_TIMEOUT_SECS"))
                .unwrap_or(30),
            enrichment_retries: file
                .enrichment
                .retries
                .or_else(|| env_parsed("WEBMEM_ENRICHMENT_RETRIES"))
                .unwrap_or(3),
            enrichment_llm_model: file
                .enrichment
                .llm_model
                .clone()
                .or_else(|| env_str("WEBMEM_LLM_MODEL"))
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            enrichment_embedding_model: file
                .enrichment
                .embedding_model
                .clone()
                .or_else(|| env_str("WEBMEM_EMBEDDING_MODEL"))
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),

            embedding_dimension: file
                .embedding
                .dimension
                .or_else(|| env_parsed("WEBMEM_EMBEDDING_DIMENSION"))
                .unwrap_or(2048),

            store_path: file
                .store
                .path
                .clone()
                .map(PathBuf::from)
                .or_else(|| env_str("WEBMEM_STORE_PATH").map(PathBuf::from))
                .unwrap_or_else(|| data_dir.join("webmem.db")),
            store_staleness_days: file
                .store
                .staleness_days
                .or_else(|| env_parsed("WEBMEM_STALENESS_DAYS"))
                .unwrap_or(3),

            vector_soft_cap: file
                .vector
                .soft_cap
                .or_else(|| env_parsed("WEBMEM_VECTOR_SOFT_CAP"))
                .unwrap_or(10_000),

            cache_capacity: file
                .cache
                .capacity
                .or_else(|| env_parsed("WEBMEM_CACHE_CAPACITY"))
                .unwrap_or(1_000),
            cache_ttl_days: file
                .cache
                .ttl_days
                .or_else(|| env_parsed("WEBMEM_CACHE_TTL_DAYS"))
                .unwrap_or(7),
            cache_persistence_path: file
                .cache
                .persistence_path
                .clone()
                .map(PathBuf::from)
                .or_else(|| env_str("WEBMEM_CACHE_PATH").map(PathBuf::from))
                .unwrap_or_else(|| data_dir.join("query_cache.json")),
            cache_persist_every_n_mutations: file
                .cache
                .persist_every_n_mutations
                .or_else(|| env_parsed("WEBMEM_CACHE_PERSIST_EVERY_N"))
                .unwrap_or(20),

            eviction_capacity: file
                .eviction
                .capacity
                .or_else(|| env_parsed("WEBMEM_EVICTION_CAPACITY"))
                .unwrap_or(1_000),
            eviction_headroom: file
                .eviction
                .headroom
                .or_else(|| env_parsed("WEBMEM_EVICTION_HEADROOM"))
                .unwrap_or(50),
            eviction_protect_window_minutes: file
                .eviction
                .protect_window_minutes
                .or_else(|| env_parsed("WEBMEM_EVICTION_PROTECT_WINDOW_MINUTES"))
                .unwrap_or(60),
            eviction_random_trigger_probability: file
                .eviction
                .random_trigger_probability
                .or_else(|| env_parsed("WEBMEM_EVICTION_RANDOM_TRIGGER_PROBABILITY"))
                .unwrap_or(0.01),
            eviction_sweep_interval_secs: file
                .eviction
                .sweep_interval_secs
                .or_else(|| env_parsed("WEBMEM_EVICTION_SWEEP_INTERVAL_SECS"))
                .unwrap_or(3600),

            search_max_results: file
                .search
                .max_results
                .or_else(|| env_parsed("WEBMEM_SEARCH_MAX_RESULTS"))
                .unwrap_or(10),
            search_semantic_weight: file
                .search
                .semantic_weight
                .or_else(|| env_parsed("WEBMEM_SEARCH_SEMANTIC_WEIGHT"))
                .unwrap_or(0.7),
            search_keyword_weight: file
                .search
                .keyword_weight
                .or_else(|| env_parsed("WEBMEM_SEARCH_KEYWORD_WEIGHT"))
                .unwrap_or(0.3),
            search_freq_weight: file
                .search
                .freq_weight
                .or_else(|| env_parsed("WEBMEM_SEARCH_FREQ_WEIGHT"))
                .unwrap_or(0.1),
            search_drop_ratio: file
                .search
                .drop_ratio
                .or_else(|| env_parsed("WEBMEM_SEARCH_DROP_RATIO"))
                .unwrap_or(0.4),
            search_min_absolute: file
                .search
                .min_absolute
                .or_else(|| env_parsed("WEBMEM_SEARCH_MIN_ABSOLUTE"))
                .unwrap_or(0.2),
            search_k_lexical: file
                .search
                .k_lexical
                .or_else(|| env_parsed("WEBMEM_SEARCH_K_LEXICAL"))
                .unwrap_or(20),
        }
    }

    /// Convenience: load a file at `path` (if present) and resolve it.
    pub fn load(path: &Path) -> anyhow_free::Result<Self> {
        let file = ConfigFile::load(path)?;
        Ok(Self::resolve(&file))
    }

    /// Resolve defaults with no file and no env overrides — used by tests
    /// and by callers that want a self-contained in-memory engine.
    pub fn defaults_for_test(data_dir: &Path) -> Self {
        let mut cfg = Self::resolve(&ConfigFile::default());
        cfg.store_path = data_dir.join("webmem.db");
        cfg.cache_persistence_path = data_dir.join("query_cache.json");
        cfg
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "webmem", "core") {
        let dir = proj_dirs.data_dir().to_path_buf();
        let _ = std::fs::create_dir_all(&dir);
        dir
    } else {
        PathBuf::from(".")
    }
}
