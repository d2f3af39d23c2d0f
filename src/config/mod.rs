//! Loader configuration file (`tmpldeps.toml`).
//!
//! The configuration carries everything a [`ProcessOptions`] needs that does
//! not come from the template itself:
//!
//! ```toml
//! search_paths = ["templates"]
//! assets_paths = ["assets"]
//! autoescape = true
//! throw_on_undefined = false
//! module_var = "template"
//!
//! [globals]
//! site_name = "Example"
//!
//! [extensions]
//! highlight = "addons/highlight.toml"
//!
//! [filters]
//! shout = "addons/shout.toml"
//!
//! [tags]
//! variable_start = "<$"
//! variable_end = "$>"
//! ```
//!
//! Every field is optional. Relative directories and addon module paths are
//! resolved against the directory containing the file, so a configuration
//! behaves the same whatever the working directory.
//!
//! # Location
//!
//! 1. The path given with `--config`, or in `TMPLDEPS_CONFIG`
//! 2. `tmpldeps.toml` in the current directory, when present
//! 3. Built-in defaults

mod parser;

pub use parser::parse_config;

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::LoaderError;
use crate::process::{DEFAULT_MODULE_VAR, ProcessOptions};
use crate::template::{EnvironmentOptions, TagSyntax};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "tmpldeps.toml";

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "TMPLDEPS_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub search_paths: Vec<PathBuf>,
    pub assets_paths: Vec<PathBuf>,
    pub autoescape: bool,
    pub throw_on_undefined: bool,
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
    pub module_var: String,
    pub globals: BTreeMap<String, serde_json::Value>,
    pub extensions: BTreeMap<String, PathBuf>,
    pub filters: BTreeMap<String, PathBuf>,
    pub tags: TagSyntax,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let env = EnvironmentOptions::default();
        Self {
            search_paths: Vec::new(),
            assets_paths: Vec::new(),
            autoescape: env.autoescape,
            throw_on_undefined: env.throw_on_undefined,
            trim_blocks: env.trim_blocks,
            lstrip_blocks: env.lstrip_blocks,
            module_var: DEFAULT_MODULE_VAR.to_string(),
            globals: BTreeMap::new(),
            extensions: BTreeMap::new(),
            filters: BTreeMap::new(),
            tags: env.tags,
        }
    }
}

fn rebase(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

impl LoaderConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, has
    /// unknown keys, or declares unusable tag delimiters.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config: Self = parse_config(path).await?;
        config.validate()?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.search_paths.iter_mut().for_each(|p| rebase(base, p));
        config.assets_paths.iter_mut().for_each(|p| rebase(base, p));
        config.extensions.values_mut().for_each(|p| rebase(base, p));
        config.filters.values_mut().for_each(|p| rebase(base, p));

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `explicit` if given, else [`CONFIG_FILE_NAME`] in `dir` if it
    /// exists, else the defaults.
    ///
    /// # Errors
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub async fn load_or_default(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path).await;
        }
        let default = dir.join(CONFIG_FILE_NAME);
        if tokio::fs::try_exists(&default).await.unwrap_or(false) {
            Self::load_from(&default).await
        } else {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, dir.display());
            Ok(Self::default())
        }
    }

    /// # Errors
    ///
    /// Returns [`LoaderError::Config`] for empty or clashing tag delimiters
    /// or a module variable that is empty.
    pub fn validate(&self) -> Result<(), LoaderError> {
        self.tags.validate().map_err(|message| LoaderError::Config {
            message,
        })?;
        if self.module_var.trim().is_empty() {
            return Err(LoaderError::Config {
                message: "module_var must not be empty".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn environment_options(&self) -> EnvironmentOptions {
        EnvironmentOptions {
            autoescape: self.autoescape,
            throw_on_undefined: self.throw_on_undefined,
            trim_blocks: self.trim_blocks,
            lstrip_blocks: self.lstrip_blocks,
            tags: self.tags.clone(),
        }
    }

    #[must_use]
    pub fn into_options(self) -> ProcessOptions {
        ProcessOptions {
            environment: self.environment_options(),
            search_paths: self.search_paths,
            assets_paths: self.assets_paths,
            globals: self.globals,
            extensions: self.extensions,
            filters: self.filters,
            module_var: self.module_var,
        }
    }
}
