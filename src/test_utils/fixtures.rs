//! On-disk template fixtures.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory holding templates, assets and addon descriptors.
///
/// The directory is removed when the fixture is dropped.
#[derive(Debug)]
pub struct TemplateTree {
    root: TempDir,
}

impl TemplateTree {
    /// # Errors
    ///
    /// Fails if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let root = TempDir::new().context("Failed to create temp directory")?;
        Ok(Self {
            root,
        })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Absolute path of `relative` inside the tree, without touching disk.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Write `content` to `relative`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails on any filesystem error.
    pub fn write(&self, relative: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Create the directory `relative` and its parents.
    ///
    /// # Errors
    ///
    /// Fails on any filesystem error.
    pub fn dir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.join(relative);
        std::fs::create_dir_all(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(path)
    }

    /// Write a `tmpldeps.toml` at the root of the tree.
    ///
    /// # Errors
    ///
    /// Fails on any filesystem error.
    pub fn config(&self, content: &str) -> Result<PathBuf> {
        self.write(crate::config::CONFIG_FILE_NAME, content)
    }
}
