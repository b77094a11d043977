//! Configuration management for lineage tooling
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (lineage.toml)
//! - Environment variables (LINEAGE_*)
//!
//! The core never reads configuration itself; callers turn a loaded
//! [`LineageConfig`] into [`BindOptions`] and codec choices.
//!
//! ## Example config file (lineage.toml):
//! ```toml
//! [bind]
//! skip_compat_checks = false
//! force_verify = true
//! source_name = "lineages/widget.json"
//!
//! [validation]
//! search_newest_first = true
//!
//! [mux]
//! format = "yaml"
//! document = "request-body"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bind::BindOptions;
use crate::lineage::DEFAULT_DATA_NAME;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageConfig {
    /// Binding settings
    #[serde(default)]
    pub bind: BindConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Version multiplexer settings
    #[serde(default)]
    pub mux: MuxConfig,
}

/// Binding configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindConfig {
    /// Skip pairwise compatibility checks
    #[serde(default)]
    pub skip_compat_checks: bool,

    /// Run every check even when skipping is requested
    #[serde(default)]
    pub force_verify: bool,

    /// Document name for schema positions in diagnostics
    #[serde(default)]
    pub source_name: Option<String>,
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Try schemas newest first when the version of some data is unknown
    #[serde(default = "default_true")]
    pub search_newest_first: bool,
}

/// Data encoding handled by a mux
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Json,
    Yaml,
}

/// Version multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Encoding of incoming bytes
    #[serde(default)]
    pub format: DataFormat,

    /// Name given to decoded documents in diagnostics
    #[serde(default = "default_document")]
    pub document: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_document() -> String {
    DEFAULT_DATA_NAME.to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            search_newest_first: true,
        }
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            format: DataFormat::Json,
            document: default_document(),
        }
    }
}

impl LineageConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a required file on top of the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["lineage.toml", ".lineage.toml", "config/lineage.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "lineage", "schema-lineage") {
            let xdg_config = config_dir.config_dir().join("lineage.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (LINEAGE_*)
        builder = builder.add_source(
            Environment::with_prefix("LINEAGE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Bind options described by this configuration
    pub fn bind_options(&self) -> BindOptions {
        let mut opts = BindOptions::new();
        if self.bind.skip_compat_checks {
            opts = opts.skip_compat_checks();
        }
        if self.bind.force_verify {
            opts = opts.force_verify();
        }
        if let Some(name) = &self.bind.source_name {
            opts = opts.source_name(name.clone());
        }
        opts
    }
}
