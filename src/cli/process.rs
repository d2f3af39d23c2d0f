//! `tmpldeps process`: run the loader on one template and print the manifest.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::addons::DescriptorFileLoader;
use crate::config::LoaderConfig;
use crate::process::Processor;
use crate::resolver::FsProbe;

fn prepend(mut first: Vec<PathBuf>, mut rest: Vec<PathBuf>) -> Vec<PathBuf> {
    first.append(&mut rest);
    first
}

/// Process a single template.
///
/// Directories given on the command line are searched before the ones from
/// the configuration file. With no search directory at all, the template's
/// own directory is used.
#[derive(Args, Debug)]
pub struct ProcessCommand {
    /// Template file to process
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    /// Directory to search for sub-templates (repeatable, highest priority first)
    #[arg(long = "search-path", value_name = "DIR")]
    pub search_paths: Vec<PathBuf>,

    /// Directory to search for assets (repeatable, highest priority first)
    #[arg(long = "assets-path", value_name = "DIR")]
    pub assets_paths: Vec<PathBuf>,

    /// Variable the precompiled module is bound to
    #[arg(long, value_name = "NAME")]
    pub module_var: Option<String>,

    /// Leave the precompiled source out of the output
    #[arg(long)]
    pub manifest_only: bool,
}

impl ProcessCommand {
    /// # Errors
    ///
    /// Fails if the configuration or template cannot be read, or if
    /// processing fails.
    pub async fn execute_with_config(self, config_path: Option<&Path>) -> Result<()> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let config = LoaderConfig::load_or_default(config_path, &cwd).await?;
        let mut options = config.into_options();

        options.search_paths = prepend(self.search_paths, options.search_paths);
        options.assets_paths = prepend(self.assets_paths, options.assets_paths);
        if options.search_paths.is_empty() {
            let own_dir = self.template.parent().filter(|p| !p.as_os_str().is_empty());
            options.search_paths.push(own_dir.map_or_else(|| cwd.clone(), Path::to_path_buf));
        }
        if let Some(module_var) = self.module_var {
            options.module_var = module_var;
        }

        let source = tokio::fs::read_to_string(&self.template)
            .await
            .with_context(|| format!("Failed to read template {}", self.template.display()))?;
        let name = self.template.display().to_string();

        let processor = Processor::new(FsProbe, DescriptorFileLoader::new(&cwd));
        let manifest = processor.process(&name, &source, &options).await?;

        let report = manifest.report(&name, !self.manifest_only);
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize manifest")?;
        println!("{json}");
        Ok(())
    }
}
