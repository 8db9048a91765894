//! Configuration management for Aeonis
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (AEONIS_*)
//! 3. Config file (~/.config/aeonis/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Repository cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one working copy per project
    pub root: Option<PathBuf>,

    /// Maximum number of in-memory working copy handles
    pub capacity: usize,

    /// On-disk working copies unused for longer than this are pruned
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            capacity: 32,
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl CacheConfig {
    /// Resolve the cache root, falling back to `~/.cache/aeonis/repos`
    pub fn root_dir(&self) -> Result<PathBuf> {
        match self.root {
            Some(ref root) => Ok(root.clone()),
            None => default_cache_root(),
        }
    }
}

/// Git network configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Deadline for a single clone or fetch
    #[serde(with = "humantime_serde")]
    pub network_timeout: Duration,

    /// Name of the remote working copies are cloned from
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            network_timeout: Duration::from_secs(5 * 60),
            remote: "origin".to_string(),
        }
    }
}

/// Static scanner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Path to the semgrep executable
    pub path: String,

    /// Ruleset identifier passed as `--config`
    pub ruleset: String,

    /// Deadline for a single scan
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            path: "semgrep".to_string(),
            ruleset: crate::scanner::DEFAULT_RULESET.to_string(),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Completion engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// API base URL (without the `/models/...` suffix)
    pub base_url: String,

    /// Maximum number of model calls in one conversation
    pub max_turns: usize,

    /// Optional file with system instructions replacing the built-in ones
    pub instructions_file: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash-latest".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_turns: 10,
            instructions_file: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database (defaults to `~/.cache/aeonis/aeonis.db`)
    pub path: Option<PathBuf>,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Repository cache configuration
    pub cache: CacheConfig,

    /// Git network configuration
    pub git: GitConfig,

    /// Static scanner configuration
    pub scanner: ScannerConfig,

    /// Completion engine configuration
    pub llm: LlmConfig,

    /// Database configuration
    pub database: DatabaseConfig,
}

/// Get the default repository cache directory
///
/// Returns `~/.cache/aeonis/repos`
pub fn default_cache_root() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;

    Ok(cache_dir.join("aeonis").join("repos"))
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/aeonis/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("aeonis").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - AEONIS_CACHE_DIR: Repository cache root
    /// - AEONIS_SCANNER_PATH: Path to the semgrep executable
    /// - AEONIS_SCANNER_RULESET: Scanner ruleset
    /// - AEONIS_MODEL: Model to use
    /// - AEONIS_DATABASE: Database path
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("AEONIS_CACHE_DIR") {
            self.cache.root = Some(PathBuf::from(dir));
        }

        if let Ok(path) = std::env::var("AEONIS_SCANNER_PATH") {
            self.scanner.path = path;
        }

        if let Ok(ruleset) = std::env::var("AEONIS_SCANNER_RULESET") {
            self.scanner.ruleset = ruleset;
        }

        if let Ok(model) = std::env::var("AEONIS_MODEL") {
            self.llm.model = model;
        }

        if let Ok(path) = std::env::var("AEONIS_DATABASE") {
            self.database.path = Some(PathBuf::from(path));
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, model: Option<String>, database: Option<PathBuf>) -> Self {
        if let Some(m) = model {
            self.llm.model = m;
        }

        if let Some(path) = database {
            self.database.path = Some(path);
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        config_file: Option<&Path>,
        model: Option<String>,
        database: Option<PathBuf>,
    ) -> Result<Self> {
        let base = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };

        Ok(base
            .with_env_overrides()
            .with_cli_overrides(model, database))
    }
}
