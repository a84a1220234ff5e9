//! Process-wide settings, loaded once at startup and handed to each component.
//!
//! Settings come from an optional TOML file; every key has a default. A fixed
//! set of environment variables can then override individual values:
//!
//! | Variable | Setting |
//! |---|---|
//! | `VAULT_PATH` | `vault.path` |
//! | `INDEX_PATH` | `index.dir` |
//! | `OLLAMA_BASE_URL` | `models.ollama.base_url` |
//! | `EMBED_MODEL` | `models.ollama.embed_model` |
//! | `GENERATOR_MODEL` | `models.ollama.generator_model` |
//! | `CHUNK_SIZE` | `chunking.chunk_size` |
//! | `CHUNK_OVERLAP` | `chunking.chunk_overlap` |
//! | `TOP_K` | `retrieval.top_k` |
//! | `WATCH_DEBOUNCE_SECS` | `watch.debounce_secs` |
//! | `TIMEZONE` | `date_parser.timezone` |
//!
//! ```toml
//! [vault]
//! path = "/home/me/notes"
//!
//! [chunking]
//! chunk_size = 600
//!
//! [models.ollama]
//! base_url = "http://ollama:11434"
//! ```

use crate::error::{Result, RetrieverError};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use vaultrag_context::ChunkingConfig;
use vaultrag_models::OllamaConfig;

const DATABASE_FILE: &str = "vaultrag.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub vault: VaultConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub models: ModelsConfig,
    pub date_parser: DateParserConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Root directory of the Markdown vault.
    pub path: PathBuf,
    /// Directory names skipped anywhere in the tree.
    pub exclude_dirs: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vault"),
            exclude_dirs: vec![".obsidian".to_string(), ".trash".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the index database.
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".vaultrag"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum number of candidates fetched before post-filtering.
    pub pool_size: usize,
    /// The pool is at least `k * pool_multiplier`.
    pub pool_multiplier: usize,
    /// Added to the built-in stop list of the query name extractor.
    pub extra_stop_words: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            pool_size: 200,
            pool_multiplier: 10,
            extra_stop_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ollama,
    Fastembed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityBackend {
    /// Capitalised-name heuristics, no external service.
    Heuristic,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub embedding_backend: EmbeddingBackend,
    /// Model code used when `embedding_backend = "fastembed"`.
    pub fastembed_model: String,
    pub entity_classifier: EntityBackend,
    pub ollama: OllamaConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding_backend: EmbeddingBackend::Ollama,
            fastembed_model: "Xenova/all-MiniLM-L6-v2".to_string(),
            entity_classifier: EntityBackend::Heuristic,
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateParserConfig {
    /// Ask the generation service when no pattern matches a temporal query.
    pub llm_fallback: bool,
    pub fallback_timeout_secs: u64,
    /// Extra attempts after a transient, non-timeout failure.
    pub fallback_retries: u32,
    /// IANA zone that decides what "today" is.
    pub timezone: Tz,
}

impl Default for DateParserConfig {
    fn default() -> Self {
        Self {
            llm_fallback: true,
            fallback_timeout_secs: 20,
            fallback_retries: 1,
            timezone: chrono_tz::Europe::London,
        }
    }
}

impl DateParserConfig {
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }

    /// Calendar day of `instant` in the configured zone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(Utc::now())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period before a batch of changes is indexed.
    pub debounce_secs: f64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_secs: 3.0 }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.debounce_secs.max(0.0))
    }
}

impl RagConfig {
    /// Reads a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RagConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// [`RagConfig::load`] when a path is given, defaults otherwise, then
    /// environment overrides and validation.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the recognised variables from `vars`; unknown keys are ignored.
    pub fn apply_env_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                "VAULT_PATH" => self.vault.path = PathBuf::from(value),
                "INDEX_PATH" => self.index.dir = PathBuf::from(value),
                "OLLAMA_BASE_URL" => self.models.ollama.base_url = value.to_string(),
                "EMBED_MODEL" => self.models.ollama.embed_model = value.to_string(),
                "GENERATOR_MODEL" => self.models.ollama.generator_model = value.to_string(),
                "CHUNK_SIZE" => self.chunking.chunk_size = parse_var("CHUNK_SIZE", value)?,
                "CHUNK_OVERLAP" => {
                    self.chunking.chunk_overlap = parse_var("CHUNK_OVERLAP", value)?
                }
                "TOP_K" => self.retrieval.top_k = parse_var("TOP_K", value)?,
                "WATCH_DEBOUNCE_SECS" => {
                    self.watch.debounce_secs = parse_var("WATCH_DEBOUNCE_SECS", value)?
                }
                "TIMEZONE" => self.date_parser.timezone = parse_var("TIMEZONE", value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.vault.path.as_os_str().is_empty() {
            return Err(RetrieverError::configuration("vault.path must be set"));
        }
        if self.index.dir.as_os_str().is_empty() {
            return Err(RetrieverError::configuration("index.dir must be set"));
        }
        if self.chunking.chunk_size == 0 {
            return Err(RetrieverError::configuration(
                "chunking.chunk_size must be > 0",
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RetrieverError::configuration(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(RetrieverError::configuration("retrieval.top_k must be >= 1"));
        }
        if self.retrieval.pool_size < self.retrieval.top_k {
            return Err(RetrieverError::configuration(
                "retrieval.pool_size must be >= retrieval.top_k",
            ));
        }
        if !self.watch.debounce_secs.is_finite() || self.watch.debounce_secs < 0.0 {
            return Err(RetrieverError::configuration(
                "watch.debounce_secs must be a non-negative number",
            ));
        }
        self.models
            .ollama
            .validate()
            .map_err(|e| RetrieverError::configuration(e.to_string()))?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.index.dir.join(DATABASE_FILE)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RetrieverError::configuration(format!("{name} has an invalid value: '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.chunking.chunk_size, 900);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.watch.debounce(), Duration::from_secs(3));
        assert_eq!(config.vault.exclude_dirs, vec![".obsidian", ".trash"]);
        assert_eq!(config.date_parser.timezone, chrono_tz::Europe::London);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("vaultrag.toml");
        std::fs::write(
            &path,
            r#"
[vault]
path = "/notes"

[chunking]
chunk_size = 600

[retrieval]
extra_stop_words = ["Standup"]

[models]
entity_classifier = "none"

[models.ollama]
base_url = "http://ollama:11434"
"#,
        )?;

        let config = RagConfig::load(&path)?;
        assert_eq!(config.vault.path, PathBuf::from("/notes"));
        assert_eq!(config.chunking.chunk_size, 600);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.retrieval.extra_stop_words, vec!["Standup"]);
        assert_eq!(config.models.entity_classifier, EntityBackend::None);
        assert_eq!(config.models.ollama.base_url, "http://ollama:11434");
        assert_eq!(config.models.ollama.embed_model, "nomic-embed-text");
        Ok(())
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RagConfig::default();
        config
            .apply_env_overrides([
                ("VAULT_PATH", "/vault"),
                ("CHUNK_SIZE", "500"),
                ("TOP_K", "8"),
                ("WATCH_DEBOUNCE_SECS", "1.5"),
                ("TIMEZONE", "America/New_York"),
                ("HOME", "/root"),
            ])
            .unwrap();
        assert_eq!(config.date_parser.timezone, chrono_tz::America::New_York);
        assert_eq!(config.vault.path, PathBuf::from("/vault"));
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.watch.debounce(), Duration::from_millis(1500));
    }

    #[test]
    fn test_bad_env_value_is_configuration_error() {
        let mut config = RagConfig::default();
        let err = config
            .apply_env_overrides([("CHUNK_SIZE", "lots")])
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Configuration(_)));
    }

    #[test]
    fn test_unknown_timezone_is_configuration_error() {
        let mut config = RagConfig::default();
        for bad in ["Mars/Olympus_Mons", "+40000000", ""] {
            let err = config.apply_env_overrides([("TIMEZONE", bad)]).unwrap_err();
            assert!(matches!(err, RetrieverError::Configuration(_)), "value: {bad:?}");
        }
        assert_eq!(config.date_parser.timezone, chrono_tz::Europe::London);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vaultrag.toml");
        std::fs::write(&path, "[date_parser]\ntimezone = \"Nowhere/Special\"\n").unwrap();
        assert!(RagConfig::load(&path).is_err());
    }

    #[test]
    fn test_local_date_tracks_summer_time() {
        let config = DateParserConfig::default();
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);

        // GMT in winter: the UTC day is the local day.
        assert_eq!(
            config.local_date(at("2024-01-15T23:30:00Z")),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        // BST from 2024-03-31 01:00 UTC.
        assert_eq!(
            config.local_date(at("2024-03-31T00:30:00Z")),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
        );
        assert_eq!(
            config.local_date(at("2024-06-30T23:30:00Z")),
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
        );
        // Back to GMT after 2024-10-27 01:00 UTC.
        assert_eq!(
            config.local_date(at("2024-10-27T23:30:00Z")),
            NaiveDate::from_ymd_opt(2024, 10, 27).unwrap()
        );
    }

    #[test]
    fn test_timezone_from_toml() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("vaultrag.toml");
        std::fs::write(&path, "[date_parser]\ntimezone = \"Asia/Tokyo\"\n")?;
        let config = RagConfig::load(&path)?;
        assert_eq!(config.date_parser.timezone, chrono_tz::Asia::Tokyo);
        Ok(())
    }

    #[test]
    fn test_validation_rejects_inconsistent_settings() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.retrieval.pool_size = 2;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.vault.path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
