//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `MNEMOS_*` environment variables. Values that fail to parse are
//! ignored so a bad override never prevents startup.

use crate::models::clamp_unit;
use crate::observability::{LOG_ENV, LogFormat, LoggingConfig};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name used when `db_path` points at a directory.
pub const DB_FILE_NAME: &str = "graph.db";

/// Persistence engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Database location. `None` keeps the graph in memory.
    ///
    /// A directory stores [`DB_FILE_NAME`] inside it; any other path is used
    /// as the database file.
    pub db_path: Option<PathBuf>,
    /// Whether to cache recently touched entities.
    pub enable_cache: bool,
    /// Maximum cached entities.
    pub cache_size: usize,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            enable_cache: true,
            cache_size: 1000,
            busy_timeout_ms: 5000,
        }
    }
}

impl GraphConfig {
    /// In-memory configuration with defaults.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// On-disk configuration rooted at `path`.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Disables the read cache.
    #[must_use]
    pub const fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }

    /// Resolves the database file, if on disk.
    #[must_use]
    pub fn database_file(&self) -> Option<PathBuf> {
        self.db_path.as_ref().map(|path| {
            if path.is_dir() || path.extension().is_none() {
                path.join(DB_FILE_NAME)
            } else {
                path.clone()
            }
        })
    }
}

/// Hybrid search defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchConfig {
    /// Weight of the vector similarity score.
    pub vector_weight: f32,
    /// Weight of the graph connectivity score.
    pub graph_weight: f32,
    /// Results returned per query.
    pub top_k: usize,
    /// Minimum vector similarity.
    pub threshold: f32,
    /// Neighborhood depth used for graph scoring.
    pub neighborhood_depth: u32,
    /// Incident edge count at which the connectivity bonus saturates.
    pub saturation_edges: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            graph_weight: 0.4,
            top_k: 10,
            threshold: 0.3,
            neighborhood_depth: 1,
            saturation_edges: 5,
        }
    }
}

impl HybridSearchConfig {
    /// Creates configuration from defaults plus `MNEMOS_*` environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(&|key| std::env::var(key).ok());
        config
    }

    /// Clamps weights and threshold into `[0, 1]`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.vector_weight = clamp_unit(self.vector_weight);
        self.graph_weight = clamp_unit(self.graph_weight);
        self.threshold = clamp_unit(self.threshold);
        self.saturation_edges = self.saturation_edges.max(1);
        self
    }

    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("MNEMOS_VECTOR_WEIGHT")
            && let Ok(weight) = val.parse()
        {
            self.vector_weight = weight;
        }

        if let Some(val) = lookup("MNEMOS_GRAPH_WEIGHT")
            && let Ok(weight) = val.parse()
        {
            self.graph_weight = weight;
        }

        if let Some(val) = lookup("MNEMOS_TOP_K")
            && let Ok(top_k) = val.parse()
        {
            self.top_k = top_k;
        }

        if let Some(val) = lookup("MNEMOS_THRESHOLD")
            && let Ok(threshold) = val.parse()
        {
            self.threshold = threshold;
        }

        if let Some(val) = lookup("MNEMOS_NEIGHBORHOOD_DEPTH")
            && let Ok(depth) = val.parse()
        {
            self.neighborhood_depth = depth;
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemosConfig {
    /// Persistence engine settings.
    pub graph: GraphConfig,
    /// Hybrid search settings.
    pub search: HybridSearchConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl MnemosConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::parse_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn parse_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(config.normalized())
    }

    /// Loads `mnemos/config.toml` from the platform config directory.
    ///
    /// Falls back to defaults when no file exists or it fails to parse.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let path = base_dirs.config_dir().join("mnemos").join("config.toml");
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file"),
            }
        }

        Self::default()
    }

    /// Loads a `.env` file into the process environment, then applies overrides.
    ///
    /// A missing `.env` file is not an error.
    #[must_use]
    pub fn from_env_file(self, path: Option<&Path>) -> Self {
        let loaded = match path {
            Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
            None => dotenvy::dotenv(),
        };
        if let Err(e) = loaded {
            tracing::debug!(error = %e, "No .env file loaded");
        }
        self.with_env_overrides()
    }

    /// Applies `MNEMOS_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(&|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup("MNEMOS_DB_PATH") {
            self.graph.db_path = if val.is_empty() || val == ":memory:" {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Some(val) = lookup("MNEMOS_CACHE_ENABLED")
            && let Ok(enabled) = val.parse()
        {
            self.graph.enable_cache = enabled;
        }

        if let Some(val) = lookup("MNEMOS_CACHE_SIZE")
            && let Ok(size) = val.parse()
        {
            self.graph.cache_size = size;
        }

        if let Some(val) = lookup("MNEMOS_BUSY_TIMEOUT_MS")
            && let Ok(timeout) = val.parse()
        {
            self.graph.busy_timeout_ms = timeout;
        }

        self.search.apply_overrides(lookup);

        if let Some(val) = lookup(LOG_ENV) {
            self.logging.level = val;
        }

        if let Some(val) = lookup("MNEMOS_LOG_FORMAT")
            && let Some(format) = LogFormat::parse(&val)
        {
            self.logging.format = format;
        }

        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.search = self.search.normalized();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MnemosConfig::default();
        assert!(config.graph.db_path.is_none());
        assert!(config.graph.enable_cache);
        assert_eq!(config.graph.cache_size, 1000);
        assert!((config.search.vector_weight - 0.6).abs() < f32::EPSILON);
        assert!((config.search.graph_weight - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.search.top_k, 10);
        assert_eq!(config.search.neighborhood_depth, 1);
        assert_eq!(config.search.saturation_edges, 5);
    }

    #[test]
    fn test_parse_toml_partial() {
        let config = MnemosConfig::parse_toml(
            r#"
            [graph]
            db_path = "/tmp/mnemos"
            cache_size = 50

            [search]
            vector_weight = 1.5
            top_k = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.graph.db_path, Some(PathBuf::from("/tmp/mnemos")));
        assert_eq!(config.graph.cache_size, 50);
        assert!(config.graph.enable_cache);
        assert!((config.search.vector_weight - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.search.top_k, 3);
    }

    #[test]
    fn test_parse_toml_invalid() {
        let result = MnemosConfig::parse_toml("[graph\ncache_size = ");
        assert!(matches!(
            result,
            Err(Error::OperationFailed { ref operation, .. }) if operation == "parse_config_file"
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[search]\nthreshold = 0.5\n").unwrap();
        let config = MnemosConfig::load_from_file(&path).unwrap();
        assert!((config.search.threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_overrides() {
        let lookup = lookup_from(&[
            ("MNEMOS_DB_PATH", "/data/graph.db"),
            ("MNEMOS_CACHE_ENABLED", "false"),
            ("MNEMOS_VECTOR_WEIGHT", "0.8"),
            ("MNEMOS_GRAPH_WEIGHT", "not-a-number"),
            ("MNEMOS_TOP_K", "25"),
            ("MNEMOS_LOG_FORMAT", "json"),
        ]);
        let config = MnemosConfig::default().with_overrides(&lookup);
        assert_eq!(config.graph.db_path, Some(PathBuf::from("/data/graph.db")));
        assert!(!config.graph.enable_cache);
        assert!((config.search.vector_weight - 0.8).abs() < f32::EPSILON);
        assert!((config.search.graph_weight - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.search.top_k, 25);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_memory_db_override() {
        let lookup = lookup_from(&[("MNEMOS_DB_PATH", ":memory:")]);
        let config = MnemosConfig {
            graph: GraphConfig::at("/data"),
            ..MnemosConfig::default()
        }
        .with_overrides(&lookup);
        assert!(config.graph.db_path.is_none());
    }

    #[test]
    fn test_database_file_resolution() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(
            GraphConfig::at(dir.path()).database_file(),
            Some(dir.path().join(DB_FILE_NAME))
        );
        let file = dir.path().join("custom.sqlite");
        assert_eq!(GraphConfig::at(&file).database_file(), Some(file));
        assert_eq!(GraphConfig::in_memory().database_file(), None);
    }
}
