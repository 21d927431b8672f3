//! Configuration: embedding/chunking/search knobs plus per-profile provider
//! settings. Grounded on the teacher's `config.rs` (`RAGConfig`,
//! `EmbeddingConfig`, `ChunkingConfig`, `SearchConfig`, `validate()`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_dir: PathBuf,
    pub model_id: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hybrid candidate count requested from each of dense/sparse before dedup.
    pub hybrid_k: usize,
    /// Candidates kept after reranking, before the diversity filter.
    pub rerank_top_k: usize,
    /// Max chunks admitted per source item by the diversity filter.
    pub max_per_item: usize,
    /// Max total chunks admitted by the diversity filter.
    pub max_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub enable_reranking: bool,
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.chunking.chunk_size < 50 {
            return Err("chunking.chunk_size must be >= 50".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if self.search.hybrid_k == 0 {
            return Err("search.hybrid_k must be > 0".into());
        }
        if self.search.max_per_item == 0 || self.search.max_total == 0 {
            return Err("search.max_per_item and max_total must be > 0".into());
        }
        if self.search.max_per_item > self.search.max_total {
            return Err("search.max_per_item must be <= max_total".into());
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {e}"))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| format!("failed to parse config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn collection_name(&self) -> String {
        format!("lib_{}", self.embedding.model_id)
    }

    pub fn sparse_index_name(&self) -> String {
        format!("bm25_{}", self.embedding.model_id)
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shodh-rag");

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                model_dir: PathBuf::from("models"),
                model_id: "multilingual-e5-base".to_string(),
                dimension: 768,
            },
            chunking: ChunkingConfig {
                chunk_size: 800,
                chunk_overlap: 200,
                min_chunk_size: 100,
            },
            search: SearchConfig {
                hybrid_k: 15,
                rerank_top_k: 10,
                max_per_item: 3,
                max_total: 6,
            },
            features: FeatureFlags {
                enable_reranking: true,
            },
        }
    }
}

/// The generation knob set every provider must accept and faithfully
/// transmit (spec.md §4.6). Providers that don't natively support a knob
/// ignore it rather than failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
    pub top_p: f32,
    pub top_k: usize,
    pub frequency_penalty: f32,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 0.95,
            top_k: 40,
            frequency_penalty: 0.0,
            repetition_penalty: 1.1,
        }
    }
}

impl GenerationParams {
    /// Params used for condensation: low temperature, short, deterministic-ish.
    pub fn for_condensation() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 150,
            ..Default::default()
        }
    }
}

/// Per-profile provider + data-source settings (spec.md §6 Configuration options).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub provider_id: String,
    pub active_model: String,
    pub embedding_model_id: String,
    pub credentials: Option<String>,
    pub bibliographic_source_path: Option<PathBuf>,
    pub generation: GenerationParams,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            provider_id: "ollama".to_string(),
            active_model: "llama3".to_string(),
            embedding_model_id: "multilingual-e5-base".to_string(),
            credentials: None,
            bibliographic_source_path: None,
            generation: GenerationParams::default(),
        }
    }
}
