//! Configuration loading for siliqa.
//! Everything is environment-driven with defaults; `.env` is honored via
//! dotenvy in the server binary before `Settings::from_env` runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Resolved endpoint for one remote capability (chat or embedding/rerank).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: String,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

/// Flat runtime settings; provider-specific env resolution happens here so
/// the rest of the system never touches the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub persist_dir: PathBuf,
    pub chat: ProviderSettings,
    pub embedding: ProviderSettings,
    pub rerank_enabled: bool,
    pub rerank_model: String,
    pub retrieval_top_k: usize,
    pub rerank_top_n: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub vector_weight: f64,
    pub bm25_weight: f64,
    pub host: String,
    pub port: u16,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Resolve the chat provider triple (key/base/model) for a provider name.
pub fn resolve_chat_provider(provider: &str) -> ProviderSettings {
    let provider = provider.to_lowercase();
    let (key_var, base_var, base_default, model_var, model_default) = match provider.as_str() {
        "deepseek" => (
            "DEEPSEEK_API_KEY",
            "DEEPSEEK_API_BASE",
            "https://api.deepseek.com/v1",
            "DEEPSEEK_MODEL",
            "deepseek-chat",
        ),
        "openai" => (
            "OPENAI_API_KEY",
            "OPENAI_API_BASE",
            "https://api.openai.com/v1",
            "OPENAI_MODEL",
            "gpt-4-turbo",
        ),
        "siliconflow" => (
            "SILICONFLOW_API_KEY",
            "SILICONFLOW_API_BASE",
            "https://api.siliconflow.cn/v1",
            "SILICONFLOW_CHAT_MODEL",
            "deepseek-ai/DeepSeek-V3",
        ),
        _ => (
            "ZHIPU_API_KEY",
            "ZHIPU_API_BASE",
            "https://open.bigmodel.cn/api/paas/v4",
            "ZHIPU_CHAT_MODEL",
            "glm-4-flash",
        ),
    };
    ProviderSettings {
        provider,
        api_key: env_or(key_var, ""),
        api_base: env_or(base_var, base_default).trim_end_matches('/').to_string(),
        model: env_or(model_var, model_default),
    }
}

/// Resolve the embedding/rerank provider triple for a provider name.
pub fn resolve_embedding_provider(provider: &str) -> ProviderSettings {
    let provider = provider.to_lowercase();
    if provider == "siliconflow" {
        ProviderSettings {
            provider,
            api_key: env_or("SILICONFLOW_API_KEY", ""),
            api_base: env_or("SILICONFLOW_API_BASE", "https://api.siliconflow.cn/v1")
                .trim_end_matches('/')
                .to_string(),
            model: env_or("SILICONFLOW_EMBEDDING_MODEL", "BAAI/bge-m3"),
        }
    } else {
        ProviderSettings {
            provider,
            api_key: env_or("ZHIPU_API_KEY", ""),
            api_base: env_or("ZHIPU_API_BASE", "https://open.bigmodel.cn/api/paas/v4")
                .trim_end_matches('/')
                .to_string(),
            model: env_or("ZHIPU_EMBEDDING_MODEL", "embedding-2"),
        }
    }
}

impl Settings {
    /// Load settings from the environment.
    pub fn from_env() -> Self {
        let chat = resolve_chat_provider(&env_or("CHAT_PROVIDER", "zhipu"));
        let embedding = resolve_embedding_provider(&env_or("EMBEDDING_PROVIDER", "zhipu"));

        let rerank_model = if embedding.provider == "siliconflow" {
            env_or("SILICONFLOW_RERANK_MODEL", "BAAI/bge-reranker-v2-m3")
        } else {
            env_or("RERANK_MODEL", "embedding-rank")
        };

        Settings {
            persist_dir: PathBuf::from(env_or("CHROMA_PERSIST_DIR", "./chroma_db")),
            chat,
            embedding,
            rerank_enabled: env_or("RERANK_ENABLED", "true").to_lowercase() == "true",
            rerank_model,
            retrieval_top_k: env_parse("RETRIEVAL_TOP_K", 20),
            rerank_top_n: env_parse("RERANK_TOP_N", 5),
            chunk_size: env_parse("CHUNK_SIZE", 500),
            chunk_overlap: env_parse("CHUNK_OVERLAP", 100),
            vector_weight: env_parse("VECTOR_WEIGHT", 0.5),
            bm25_weight: env_parse("BM25_WEIGHT", 0.5),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000),
        }
    }

    /// Optional domain dictionary for the lexical tokenizer.
    pub fn domain_dict_path(&self) -> PathBuf {
        self.persist_dir.join("eda_terms.txt")
    }

    /// Tool registry file.
    pub fn tools_config_path(&self) -> PathBuf {
        self.persist_dir.join("tools_config.json")
    }

    /// Parent map file.
    pub fn parent_docs_path(&self) -> PathBuf {
        self.persist_dir.join("parent_docs.json")
    }

    /// Conversation log database.
    pub fn history_db_path(&self) -> PathBuf {
        self.persist_dir.join("chat_history.db")
    }
}
