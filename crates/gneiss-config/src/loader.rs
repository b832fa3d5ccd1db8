//! Configuration loader with multi-source merging

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::GneissConfig;

const PROJECT_FILE: &str = "gneiss.toml";
const LOCAL_FILE: &str = "gneiss.local.toml";

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "GNS".to_string(),
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "GNS")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<GneissConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = GneissConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Project config (gneiss.toml)
        let project_file = self.project_dir.join(PROJECT_FILE);
        if project_file.exists() {
            builder = builder.add_source(
                config::File::from(project_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Local config (gneiss.local.toml, gitignored)
        let local_file = self.project_dir.join(LOCAL_FILE);
        if local_file.exists() {
            builder = builder.add_source(
                config::File::from(local_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Environment variables (GNS_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let gneiss_config: GneissConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        gneiss_config
            .validate()
            .context("Configuration failed validation")?;
        Ok(gneiss_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> GneissConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_falls_back_to_defaults_without_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .expect("load");
        assert_eq!(config, GneissConfig::default());
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(PROJECT_FILE),
            "[jobs]\ndefault_wait_timeout_secs = 120\n",
        )
        .expect("write");

        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .expect("load");
        assert_eq!(config.jobs.default_wait_timeout_secs, 120);
        assert_eq!(config.broker.inbox_capacity, 1024);
    }

    #[test]
    fn local_file_overrides_project_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(PROJECT_FILE),
            "[broker]\ninbox_capacity = 64\n",
        )
        .expect("write");
        fs::write(
            dir.path().join(LOCAL_FILE),
            "[broker]\ninbox_capacity = 32\n",
        )
        .expect("write");

        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .load()
            .expect("load");
        assert_eq!(config.broker.inbox_capacity, 32);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(PROJECT_FILE), "[broker]\ninbox_capacity = 0\n")
            .expect("write");

        let result = ConfigLoader::new().with_project_dir(dir.path()).load();
        assert!(result.is_err());
    }
}
