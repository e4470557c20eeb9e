//! Configuration file support for gitport.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `GITPORT_`, e.g., `GITPORT_SOURCE_TOKEN`)
//! 3. Local config file (./gitport.toml)
//! 4. XDG config file (~/.config/gitport/config.toml)
//! 5. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [source]
//! url = "https://gitlab.old.example.com"
//! token = "glpat-..."  # or use GITPORT_SOURCE_TOKEN env var
//!
//! [target]
//! url = "https://gitlab.new.example.com"
//! token = "glpat-..."  # or use GITPORT_TARGET_TOKEN env var
//!
//! [migrate]
//! concurrency = 5
//! overwrite = false
//! timeout_secs = 30
//! verify_ssl = true
//! poll_interval_secs = 5
//! phase_timeout_secs = 600
//! requests_per_second = 5
//! log_file = "gitport.log"
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source instance.
    pub source: InstanceConfig,
    /// Target instance.
    pub target: InstanceConfig,
    /// Migration behavior defaults.
    pub migrate: MigrateConfig,
}

/// Connection settings for one GitLab instance.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Instance URL (e.g. "https://gitlab.example.com").
    pub url: Option<String>,
    /// Personal access token with `api` scope.
    pub token: Option<String>,
}

/// Default migration options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Maximum concurrently active project migrations.
    pub concurrency: usize,
    /// Replace existing target projects instead of skipping them.
    pub overwrite: bool,
    /// API request timeout in seconds.
    pub timeout_secs: u64,
    /// Verify SSL certificates.
    pub verify_ssl: bool,
    /// Delay between export/import status polls, in seconds.
    pub poll_interval_secs: u64,
    /// Ceiling on a single export or import wait, in seconds.
    pub phase_timeout_secs: u64,
    /// Proactive request pacing per instance.
    pub requests_per_second: u32,
    /// Persistent log file path.
    pub log_file: PathBuf,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            overwrite: false,
            timeout_secs: 30,
            verify_ssl: true,
            poll_interval_secs: 5,
            phase_timeout_secs: 600,
            requests_per_second: 5,
            log_file: PathBuf::from("gitport.log"),
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        // Add XDG config file if it exists
        if let Some(proj_dirs) = ProjectDirs::from("", "", "gitport") {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!("Loading config from {:?}", xdg_config);
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        // Add local config file (higher priority than XDG)
        let local_config = PathBuf::from("gitport.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./gitport.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Add GITPORT_ prefixed environment variables
        // e.g., GITPORT_SOURCE_TOKEN -> source.token
        builder = builder.add_source(
            Environment::with_prefix("GITPORT")
                .separator("_")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    pub fn source_url(&self) -> Option<String> {
        self.source.url.clone()
    }

    pub fn source_token(&self) -> Option<String> {
        self.source.token.clone()
    }

    pub fn target_url(&self) -> Option<String> {
        self.target.url.clone()
    }

    pub fn target_token(&self) -> Option<String> {
        self.target.token.clone()
    }
}
