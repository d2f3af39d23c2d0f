//! Shared helpers for the integration suite.

use anyhow::{Context, Result};
use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tmpldeps::test_utils::TemplateTree;

/// A project directory on disk with templates, assets and addon descriptors.
pub struct TestProject {
    tree: TemplateTree,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        tmpldeps::test_utils::init_test_logging(None);
        Ok(Self {
            tree: TemplateTree::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.tree.join(relative)
    }

    pub fn write(&self, relative: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        self.tree.write(relative, content)
    }

    pub fn dir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        self.tree.dir(relative)
    }

    pub fn config(&self, content: &str) -> Result<PathBuf> {
        self.tree.config(content)
    }

    /// Base command running the binary inside the project directory.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("tmpldeps").expect("binary is built for integration tests");
        cmd.current_dir(self.path()).env_remove("TMPLDEPS_CONFIG").env_remove("RUST_LOG");
        cmd
    }

    /// Run the binary and capture its output.
    pub fn run_tmpldeps(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.command().args(args).output().context("Failed to run tmpldeps")?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        assert!(self.success, "Command failed with code {:?}\nStderr: {}", self.code, self.stderr);
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(!self.success, "Command unexpectedly succeeded\nStdout: {}", self.stdout);
        self
    }

    /// Parse stdout as the JSON manifest.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.stdout)
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}):\n{}", self.stdout))
    }
}
