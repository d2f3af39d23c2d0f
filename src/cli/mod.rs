//! Command-line interface for tmpldeps.
//!
//! The binary exists to inspect what the loader sees in a template; bundlers
//! call the library directly.
//!
//! # Commands
//!
//! - `process` - Parse, precompile and resolve one template, print the
//!   manifest as JSON
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug output
//! - `--quiet` - Suppress all log output
//! - `--config` - Path to a `tmpldeps.toml` (also `TMPLDEPS_CONFIG`)
//!
//! # Example
//!
//! ```bash
//! tmpldeps process templates/page.njk --assets-path assets
//! tmpldeps --verbose process page.njk --search-path partials --manifest-only
//! ```

mod process;

pub use process::ProcessCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::CONFIG_ENV_VAR;

/// Runtime configuration derived from the global flags.
///
/// Kept separate from [`Cli`] so tests can run commands with an explicit
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Filter directive for log output; `None` disables logging
    pub log_level: Option<String>,
    /// Explicit configuration file
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the global tracing subscriber, writing to stderr.
    ///
    /// `RUST_LOG` overrides the level chosen from the flags. Calling this more
    /// than once is harmless.
    pub fn init_logging(&self) {
        let Some(level) = &self.log_level else {
            return;
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tmpldeps",
    about = "Resolve template dependencies and precompile templates for bundlers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output; the manifest is still printed
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE", env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process a template and print its dependency manifest
    Process(ProcessCommand),
}

impl Cli {
    /// Execute the parsed command.
    ///
    /// # Errors
    ///
    /// Propagates any failure of the command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    ///
    /// - `--verbose`: `debug`
    /// - `--quiet`: no logging
    /// - otherwise: `info`
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// # Errors
    ///
    /// Propagates any failure of the command.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Process(cmd) => cmd.execute_with_config(config.config_path.as_deref()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let verbose = Cli::parse_from(["tmpldeps", "--verbose", "process", "t.njk"]);
        assert_eq!(verbose.build_config().log_level.as_deref(), Some("debug"));

        let quiet = Cli::parse_from(["tmpldeps", "process", "t.njk", "-q"]);
        assert_eq!(quiet.build_config().log_level, None);

        let default = Cli::parse_from(["tmpldeps", "process", "t.njk"]);
        assert_eq!(default.build_config().log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["tmpldeps", "-v", "-q", "process", "t.njk"]).is_err());
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::parse_from(["tmpldeps", "process", "t.njk", "--config", "conf/tmpldeps.toml"]);
        assert_eq!(cli.build_config().config_path, Some(PathBuf::from("conf/tmpldeps.toml")));
    }

    #[test]
    fn test_process_arguments() {
        let cli = Cli::parse_from([
            "tmpldeps",
            "process",
            "page.njk",
            "--search-path",
            "a",
            "--search-path",
            "b",
            "--assets-path",
            "static",
            "--module-var",
            "page",
            "--manifest-only",
        ]);
        let Commands::Process(cmd) = cli.command;
        assert_eq!(cmd.template, PathBuf::from("page.njk"));
        assert_eq!(cmd.search_paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(cmd.assets_paths, vec![PathBuf::from("static")]);
        assert_eq!(cmd.module_var.as_deref(), Some("page"));
        assert!(cmd.manifest_only);
    }
}
