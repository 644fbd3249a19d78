use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::service::accounts::{BillingPeriod, Plan};

/// Root configuration for serine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub chat: ChatConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
}

impl Config {
    /// Match a provider based on model name.
    fn match_provider(&self, model: Option<&str>) -> Option<&ProviderConfig> {
        let model = model.unwrap_or(&self.chat.model).to_lowercase();

        let providers: &[(&[&str], &ProviderConfig)] = &[
            (&["openrouter", "deepseek", "/"], &self.providers.openrouter),
            (&["gemini"], &self.providers.gemini),
        ];

        for (keywords, provider) in providers {
            for keyword in *keywords {
                if model.contains(keyword) && !provider.api_key.is_empty() {
                    return Some(provider);
                }
            }
        }
        None
    }

    /// Get API key for the given model (or default model).
    /// Falls back to first available key.
    pub fn get_api_key(&self, model: Option<&str>) -> Option<&str> {
        if let Some(p) = self.match_provider(model) {
            return Some(&p.api_key);
        }
        [&self.providers.gemini, &self.providers.openrouter]
            .into_iter()
            .find(|p| !p.api_key.is_empty())
            .map(|p| p.api_key.as_str())
    }

    /// Get API base URL based on model name.
    pub fn get_api_base(&self, model: Option<&str>) -> Option<&str> {
        let model = model.unwrap_or(&self.chat.model).to_lowercase();

        if model.contains("gemini") && !model.contains('/') {
            return self.providers.gemini.api_base.as_deref();
        }
        Some(
            self.providers
                .openrouter
                .api_base
                .as_deref()
                .unwrap_or("https://openrouter.ai/api/v1"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. The frontend URL is appended at load time.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct ProvidersConfig {
    pub gemini: ProviderConfig,
    pub openrouter: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
}

/// Retrieval scoring strategy, selected once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScoringStrategy {
    #[default]
    Trigram,
    WordOverlap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Best-match similarity below this triggers the fallback reply.
    pub similarity_threshold: f64,
    pub top_k: usize,
    pub generation_timeout_secs: u64,
    pub scoring: ScoringStrategy,
    /// Tenant-local offset used for the metrics day and greeting hour.
    pub utc_offset_minutes: i32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 1024,
            temperature: 0.3,
            similarity_threshold: 0.2,
            top_k: 3,
            generation_timeout_secs: 20,
            scoring: ScoringStrategy::Trigram,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    /// Postgres connection string. Empty means in-memory stores.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

/// A payment-processor variant resolved to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantPlan {
    pub plan: Plan,
    pub billing: BillingPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct BillingConfig {
    pub webhook_secret: String,
    pub store_id: Option<String>,
    /// Variant id -> plan.
    pub variants: HashMap<String, VariantPlan>,
}

// ====== Config loading/saving ======

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `SERINE_CONFIG` env var (full JSON config)
/// 2. Individual env vars (merged on top of defaults)
/// 3. File fallback (`~/.serine/config.json`)
pub fn load_config_from_env() -> Config {
    if let Ok(json) = std::env::var("SERINE_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse SERINE_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(None);

    // Provider keys
    if let Ok(v) = std::env::var("GEMINI_API_KEY") {
        cfg.providers.gemini.api_key = v;
    }
    if let Ok(v) = std::env::var("OPENROUTER_API_KEY") {
        cfg.providers.openrouter.api_key = v;
    }
    if let Ok(v) = std::env::var("SERINE_MODEL") {
        cfg.chat.model = v;
    }

    // Server
    if let Ok(v) = std::env::var("PORT") {
        match v.parse() {
            Ok(port) => cfg.server.port = port,
            Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", v),
        }
    }
    if let Ok(v) = std::env::var("FRONTEND_URL") {
        if !v.is_empty() && !cfg.server.allowed_origins.contains(&v) {
            cfg.server.allowed_origins.push(v);
        }
    }

    // Database
    if let Ok(v) = std::env::var("DATABASE_URL") {
        cfg.database.url = v;
    }

    // Billing
    if let Ok(v) = std::env::var("LEMON_SQUEEZY_WEBHOOK_SECRET") {
        cfg.billing.webhook_secret = v;
    }
    if let Ok(v) = std::env::var("LS_STORE_ID") {
        cfg.billing.store_id = Some(v);
    }
    let variant_envs = [
        ("LS_VARIANT_MONTHLY_STARTER", Plan::Starter, BillingPeriod::Monthly),
        ("LS_VARIANT_YEARLY_STARTER", Plan::Starter, BillingPeriod::Yearly),
        ("LS_VARIANT_MONTHLY_PROFESSIONAL", Plan::Professional, BillingPeriod::Monthly),
        ("LS_VARIANT_YEARLY_PROFESSIONAL", Plan::Professional, BillingPeriod::Yearly),
    ];
    for (key, plan, billing) in variant_envs {
        match std::env::var(key) {
            Ok(id) if !id.is_empty() => {
                cfg.billing.variants.insert(id, VariantPlan { plan, billing });
            }
            _ => tracing::debug!("Variant env {} not set", key),
        }
    }

    cfg
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Get the serine data directory.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".serine")
}

/// Load configuration from file or create default.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> std::result::Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.chat.model, "gemini-2.0-flash");
        assert_eq!(cfg.chat.top_k, 3);
        assert_eq!(cfg.chat.similarity_threshold, 0.2);
        assert_eq!(cfg.chat.scoring, ScoringStrategy::Trigram);
        assert_eq!(cfg.server.port, 3000);
        assert!(cfg.database.url.is_empty());
        assert!(cfg.providers.gemini.api_key.is_empty());
    }

    #[test]
    fn test_config_camelcase_compat() {
        let json = r#"{
            "chat": {
                "model": "deepseek/deepseek-r1:free",
                "similarityThreshold": 0.35,
                "generationTimeoutSecs": 5,
                "scoring": "wordOverlap"
            },
            "providers": {
                "openrouter": { "apiKey": "sk-or-test" }
            },
            "billing": {
                "variants": {
                    "12345": { "plan": "starter", "billing": "yearly" }
                }
            }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.chat.similarity_threshold, 0.35);
        assert_eq!(cfg.chat.generation_timeout_secs, 5);
        assert_eq!(cfg.chat.scoring, ScoringStrategy::WordOverlap);
        assert_eq!(cfg.chat.top_k, 3);
        assert_eq!(cfg.providers.openrouter.api_key, "sk-or-test");
        assert_eq!(
            cfg.billing.variants["12345"],
            VariantPlan { plan: Plan::Starter, billing: BillingPeriod::Yearly }
        );
    }

    #[test]
    fn test_get_api_key_matching() {
        let mut cfg = Config::default();
        cfg.providers.gemini.api_key = "AIza-test".to_string();
        cfg.providers.openrouter.api_key = "sk-or".to_string();

        assert_eq!(cfg.get_api_key(None), Some("AIza-test"));
        assert_eq!(cfg.get_api_key(Some("deepseek/deepseek-r1:free")), Some("sk-or"));
    }

    #[test]
    fn test_get_api_key_fallback_and_none() {
        let mut cfg = Config::default();
        assert_eq!(cfg.get_api_key(None), None);

        cfg.providers.openrouter.api_key = "sk-or".to_string();
        // Gemini model without a Gemini key falls back to the first available key
        assert_eq!(cfg.get_api_key(None), Some("sk-or"));
    }

    #[test]
    fn test_get_api_base() {
        let cfg = Config::default();
        assert_eq!(cfg.get_api_base(None), None);
        assert_eq!(
            cfg.get_api_base(Some("openrouter/auto")),
            Some("https://openrouter.ai/api/v1")
        );
    }

    #[test]
    fn test_save_and_load_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let mut cfg = Config::default();
        cfg.chat.model = "test-model".to_string();
        cfg.chat.utc_offset_minutes = 540;
        save_config(&cfg, Some(&path)).unwrap();

        assert!(path.exists());
        let loaded = load_config(Some(&path));
        assert_eq!(loaded.chat.model, "test-model");
        assert_eq!(loaded.chat.utc_offset_minutes, 540);
    }

    #[test]
    fn test_load_config_missing_file() {
        let path = Path::new("/tmp/nonexistent_serine_test.json");
        let cfg = load_config(Some(path));
        assert_eq!(cfg.chat.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_load_config_invalid_json_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cfg = load_config(Some(&path));
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn test_load_config_from_env_full_json() {
        let json = r#"{ "providers": { "gemini": { "apiKey": "AIza-env" } } }"#;
        std::env::set_var("SERINE_CONFIG", json);
        let cfg = load_config_from_env();
        assert_eq!(cfg.providers.gemini.api_key, "AIza-env");
        std::env::remove_var("SERINE_CONFIG");
    }
}
