//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::knowledge::{
    DEFAULT_AMBIGUITY_MARGIN, DEFAULT_BACKOFF_BASE_MS, DEFAULT_CALL_TIMEOUT_MS,
    DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_SENTENCE_CHARS, DEFAULT_WORKERS,
    Extractor, MAX_BACKOFF_BASE_MS, ResolverConfig, RetryPolicy, SimilarityMetric, TieBreak,
};
use crate::storage::{DEFAULT_MAX_CONNECTIONS, DatabaseConfig, default_database_path};

/// Overrides the directory holding `config.toml`
pub const CONFIG_DIR_ENV: &str = "KGFORGE_CONFIG_DIR";

/// Overrides `store.database_path`
pub const DATABASE_ENV: &str = "KGFORGE_DATABASE";

/// kgforge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub extraction: ExtractionConfig,
    pub resolution: ResolutionConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub min_sentence_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub fuzzy_enabled: bool,
    pub fuzzy_threshold: f64,
    pub ambiguity_margin: f64,
    pub tie_break: TieBreak,
    pub metric: SimilarityMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_sentence_chars: DEFAULT_MIN_SENTENCE_CHARS,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            fuzzy_enabled: false,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
            tie_break: TieBreak::default(),
            metric: SimilarityMetric::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

const KEYS: &[&str] = &[
    "store.database_path",
    "store.max_connections",
    "extraction.min_sentence_chars",
    "resolution.fuzzy_enabled",
    "resolution.fuzzy_threshold",
    "resolution.ambiguity_margin",
    "resolution.tie_break",
    "resolution.metric",
    "ingest.workers",
    "ingest.max_attempts",
    "ingest.backoff_base_ms",
    "ingest.call_timeout_ms",
];

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `kgforge config list` to see available keys.",
        key
    )
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("kgforge")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.max_connections == 0 {
            return Err(anyhow!("store.max_connections must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.resolution.fuzzy_threshold) {
            return Err(anyhow!("resolution.fuzzy_threshold must be between 0 and 100"));
        }
        if !(0.0..=100.0).contains(&self.resolution.ambiguity_margin) {
            return Err(anyhow!("resolution.ambiguity_margin must be between 0 and 100"));
        }
        if self.ingest.workers == 0 {
            return Err(anyhow!("ingest.workers must be at least 1"));
        }
        if self.ingest.max_attempts == 0 {
            return Err(anyhow!("ingest.max_attempts must be at least 1"));
        }
        if self.ingest.backoff_base_ms > MAX_BACKOFF_BASE_MS {
            return Err(anyhow!(
                "ingest.backoff_base_ms must be at most {}",
                MAX_BACKOFF_BASE_MS
            ));
        }
        if self.ingest.call_timeout_ms == 0 {
            return Err(anyhow!("ingest.call_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Database path after applying the `KGFORGE_DATABASE` override
    pub fn database_path(&self) -> PathBuf {
        env::var(DATABASE_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.store.database_path.clone())
            .unwrap_or_else(default_database_path)
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::with_path(self.database_path()).max_connections(self.store.max_connections)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            fuzzy_enabled: self.resolution.fuzzy_enabled,
            threshold: self.resolution.fuzzy_threshold,
            ambiguity_margin: self.resolution.ambiguity_margin,
            tie_break: self.resolution.tie_break,
            metric: self.resolution.metric,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ingest.max_attempts,
            backoff_base_ms: self.ingest.backoff_base_ms,
            call_timeout: Duration::from_millis(self.ingest.call_timeout_ms),
        }
    }

    /// Pattern-rule extractor with the configured sentence filter
    pub fn extractor(&self) -> Extractor {
        Extractor::pattern().with_min_sentence_chars(self.extraction.min_sentence_chars)
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "store.database_path" => Ok(self.database_path().display().to_string()),
            "store.max_connections" => Ok(self.store.max_connections.to_string()),

            "extraction.min_sentence_chars" => Ok(self.extraction.min_sentence_chars.to_string()),

            "resolution.fuzzy_enabled" => Ok(self.resolution.fuzzy_enabled.to_string()),
            "resolution.fuzzy_threshold" => Ok(self.resolution.fuzzy_threshold.to_string()),
            "resolution.ambiguity_margin" => Ok(self.resolution.ambiguity_margin.to_string()),
            "resolution.tie_break" => Ok(self.resolution.tie_break.as_str().to_string()),
            "resolution.metric" => Ok(self.resolution.metric.as_str().to_string()),

            "ingest.workers" => Ok(self.ingest.workers.to_string()),
            "ingest.max_attempts" => Ok(self.ingest.max_attempts.to_string()),
            "ingest.backoff_base_ms" => Ok(self.ingest.backoff_base_ms.to_string()),
            "ingest.call_timeout_ms" => Ok(self.ingest.call_timeout_ms.to_string()),

            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "store.database_path" => {
                let value = value.trim();
                self.store.database_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "store.max_connections" => {
                self.store.max_connections = parse_number(key, value)?;
            }

            "extraction.min_sentence_chars" => {
                self.extraction.min_sentence_chars = parse_number(key, value)?;
            }

            "resolution.fuzzy_enabled" => {
                self.resolution.fuzzy_enabled = match value.trim().to_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => {
                        return Err(anyhow!(
                            "Invalid fuzzy_enabled value: {}. Use true or false",
                            value
                        ));
                    }
                };
            }
            "resolution.fuzzy_threshold" => {
                self.resolution.fuzzy_threshold = parse_number(key, value)?;
            }
            "resolution.ambiguity_margin" => {
                self.resolution.ambiguity_margin = parse_number(key, value)?;
            }
            "resolution.tie_break" => {
                self.resolution.tie_break = TieBreak::parse(value.trim()).ok_or_else(|| {
                    anyhow!("Invalid tie_break: {}. Valid options: most_mentioned, mint_new", value)
                })?;
            }
            "resolution.metric" => {
                self.resolution.metric = SimilarityMetric::parse(value.trim()).ok_or_else(|| {
                    anyhow!("Invalid metric: {}. Valid options: levenshtein, jaro_winkler", value)
                })?;
            }

            "ingest.workers" => {
                self.ingest.workers = parse_number(key, value)?;
            }
            "ingest.max_attempts" => {
                self.ingest.max_attempts = parse_number(key, value)?;
            }
            "ingest.backoff_base_ms" => {
                self.ingest.backoff_base_ms = parse_number(key, value)?;
            }
            "ingest.call_timeout_ms" => {
                self.ingest.call_timeout_ms = parse_number(key, value)?;
            }

            _ => return Err(unknown_key(key)),
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
