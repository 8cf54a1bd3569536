//! Configuration file handling.
//!
//! Loading and saving of flavorscan configuration from a TOML file.
//! Every field has a default, so the file is optional and may be partial.
//! Command line flags override what is configured here.
//!
//! # Configuration Location
//!
//! - Linux: `~/.config/flavorscan/config.toml`
//! - macOS: `~/Library/Application Support/flavorscan/config.toml`
//! - Windows: `%APPDATA%\flavorscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! base_repository = "ghcr.io/uds-packages"
//! package_api_url = "https://api.github.com"
//! scanner_binary = "grype"
//! max_retries = 3
//! retry_backoff_secs = 5
//! default_format = "markdown"
//! image_name_overrides = ["elasticsearch=elasticsearch-exporter"]
//! log_level = "info"
//! log_format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::output::OutputFormat;
use crate::reconcile::{NameOverrides, DEFAULT_BASE_REPOSITORY, DEFAULT_PACKAGE_API_URL};
use crate::scanner::ScanOptions;

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use flavorscan::Config;
///
/// // Load from file (or use defaults if file doesn't exist)
/// let config = Config::load().unwrap();
///
/// println!("Scanner: {}", config.scanner_binary);
/// println!("Retries: {}", config.max_retries);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry API base used for released artifacts instead of
    /// `https://{host}/v2` derived from the repository.
    pub registry_base_url: Option<String>,

    /// Base URL of the package listing API.
    ///
    /// Default: `https://api.github.com`
    pub package_api_url: String,

    /// Repository prefix released packages are published under; the
    /// package name is appended.
    ///
    /// Default: `ghcr.io/uds-packages`
    pub base_repository: String,

    /// Vulnerability scanner executable.
    ///
    /// Default: `grype`
    pub scanner_binary: String,

    /// Scan attempts while the scanner database is unusable.
    ///
    /// Default: 3
    pub max_retries: u32,

    /// Pause between those attempts, in seconds.
    ///
    /// Default: 5
    pub retry_backoff_secs: u64,

    /// Output format when no `--format` flag is provided.
    ///
    /// Valid values: "markdown" (or "md", "table"), "simple"
    pub default_format: String,

    /// `released=current` image renames applied on every comparison.
    pub image_name_overrides: Vec<String>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Where fetched release SBOMs are unpacked. Default: the system temp dir.
    pub sbom_scratch_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let scan = ScanOptions::default();
        Self {
            registry_base_url: None,
            package_api_url: DEFAULT_PACKAGE_API_URL.to_string(),
            base_repository: DEFAULT_BASE_REPOSITORY.to_string(),
            scanner_binary: scan.program,
            max_retries: scan.max_retries,
            retry_backoff_secs: scan.backoff.as_secs(),
            default_format: "markdown".to_string(),
            image_name_overrides: Vec::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            sbom_scratch_dir: None,
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later, mid-scan.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        self.output_format()?;
        self.name_overrides()?;
        Ok(())
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    ///
    /// ```
    /// use flavorscan::Config;
    ///
    /// let path = Config::config_path();
    /// assert!(path.ends_with("flavorscan/config.toml"));
    /// ```
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flavorscan")
            .join("config.toml")
    }

    /// The default configuration as TOML.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        self.default_format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }

    pub fn name_overrides(&self) -> Result<NameOverrides> {
        Ok(NameOverrides::parse(self.image_name_overrides.as_slice())?)
    }

    /// Scanner settings. `verbose` routes scanner output to stderr.
    pub fn scan_options(&self, verbose: bool) -> ScanOptions {
        ScanOptions {
            program: self.scanner_binary.clone(),
            max_retries: self.max_retries,
            backoff: Duration::from_secs(self.retry_backoff_secs),
            verbose,
        }
    }
}
