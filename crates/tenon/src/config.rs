//! Workbench configuration.
//!
//! Configuration is read from `tenon.yaml` at the workspace root. Every
//! field has a default, so the file and each of its sections are optional.
//!
//! ```yaml
//! file-extensions: [".dmodel"]
//! parser:
//!   mode: workers
//!   thread-count: 4
//!   termination-delay-ms: 200
//! validation:
//!   update-categories: [built-in, fast]
//!   initial-build: true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::dispatch::WorkerPoolConfig;
use crate::error::{Error, Result};
use crate::validation::{ValidationCategory, ValidationOptions};

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "tenon.yaml";

/// Default document file extension
pub const DEFAULT_EXTENSION: &str = ".dmodel";

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkbenchConfig {
    /// Extensions (with leading dot) of files loaded as documents
    pub file_extensions: Vec<String>,

    /// Parser dispatch
    pub parser: ParserConfig,

    /// Validation requested by builds
    pub validation: ValidationConfig,
}

/// How documents are parsed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParserMode {
    /// On the calling task
    Sync,
    /// On a pool of worker threads
    #[default]
    Workers,
}

/// Parser section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ParserConfig {
    /// Dispatch mode
    pub mode: ParserMode,

    /// Maximum number of worker threads
    pub thread_count: usize,

    /// Grace period in milliseconds before a cancelled parse's worker is terminated
    pub termination_delay_ms: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        Self {
            mode: ParserMode::default(),
            thread_count: pool.thread_count,
            termination_delay_ms: u64::try_from(pool.termination_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Validation section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ValidationConfig {
    /// Categories validated after each update
    pub update_categories: Vec<ValidationCategory>,

    /// Validate every document when the workspace is first loaded
    pub initial_build: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            update_categories: vec![ValidationCategory::BuiltIn, ValidationCategory::Fast],
            initial_build: true,
        }
    }
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            file_extensions: vec![DEFAULT_EXTENSION.to_string()],
            parser: ParserConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl WorkbenchConfig {
    /// Load and validate configuration from a file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// holds invalid values.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `tenon.yaml` from `root`, or the defaults if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub async fn load_or_default(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if fs::try_exists(&path).await? {
            Self::load(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Check value constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty extension list, an extension
    /// without a leading dot, or a zero thread count.
    pub fn validate(&self) -> Result<()> {
        if self.file_extensions.is_empty() {
            return Err(Error::Config("at least one file extension is required".into()));
        }
        if let Some(extension) = self.file_extensions.iter().find(|e| !e.starts_with('.') || e.len() < 2) {
            return Err(Error::Config(format!(
                "file extension '{extension}' must start with a dot"
            )));
        }
        if self.parser.thread_count == 0 {
            return Err(Error::Config("parser thread-count must be at least 1".into()));
        }
        Ok(())
    }

    /// Worker pool sizing.
    #[must_use]
    pub const fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            thread_count: self.parser.thread_count,
            termination_delay: Duration::from_millis(self.parser.termination_delay_ms),
        }
    }

    /// Validation run after each update.
    #[must_use]
    pub fn update_validation(&self) -> ValidationOptions {
        ValidationOptions::with_categories(self.validation.update_categories.iter().copied())
    }

    /// Validation run by the initial workspace build, if any.
    #[must_use]
    pub fn initial_validation(&self) -> Option<ValidationOptions> {
        self.validation.initial_build.then(ValidationOptions::default)
    }

    /// Returns `true` if `extension` (with leading dot) is a document extension.
    #[must_use]
    pub fn is_document_extension(&self, extension: &str) -> bool {
        self.file_extensions.iter().any(|e| e == extension)
    }
}
