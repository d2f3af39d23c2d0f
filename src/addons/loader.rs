//! Built-in [`AddonLoader`] implementations.

use anyhow::{Context, Result, anyhow};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Addon, AddonLoader, Filter, FilterSpec};
use crate::core::AddonKind;
use crate::template::extension::Identity;
use crate::template::{Extension, TagExtension};

/// In-memory registry of addon instances keyed by module path.
///
/// Used by embedders that construct their addons in code, and by tests.
#[derive(Debug, Default, Clone)]
pub struct StaticAddonLoader {
    modules: HashMap<PathBuf, Addon>,
}

impl StaticAddonLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extension(&mut self, module_path: impl Into<PathBuf>, ext: Arc<dyn Extension>) {
        self.modules.insert(module_path.into(), Addon::Extension(ext));
    }

    pub fn register_filter(&mut self, module_path: impl Into<PathBuf>, filter: Arc<dyn Filter>) {
        self.modules.insert(module_path.into(), Addon::Filter(filter));
    }
}

impl AddonLoader for StaticAddonLoader {
    fn load<'a>(
        &'a self,
        _kind: AddonKind,
        _name: &'a str,
        module_path: &'a Path,
    ) -> BoxFuture<'a, Result<Addon>> {
        let found = self
            .modules
            .get(module_path)
            .cloned()
            .ok_or_else(|| anyhow!("no addon registered at {}", module_path.display()));
        futures::future::ready(found).boxed()
    }
}

/// On-disk addon description.
///
/// ```toml
/// tags = ["highlight"]
/// body = true
/// identity = "name"
/// async = false
/// ```
///
/// `tags` defaults to the declared addon name. Filters only read `async`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AddonFile {
    pub tags: Vec<String>,
    pub body: bool,
    pub identity: Identity,
    #[serde(rename = "async")]
    pub is_async: bool,
}

impl AddonFile {
    fn into_addon(self, kind: AddonKind, name: &str) -> Addon {
        match kind {
            AddonKind::Extension => {
                let tags = if self.tags.is_empty() { vec![name.to_string()] } else { self.tags };
                let ext = TagExtension::with_tags(tags)
                    .with_body(self.body)
                    .with_identity(self.identity)
                    .asynchronous(self.is_async);
                Addon::Extension(Arc::new(ext))
            }
            AddonKind::Filter => Addon::Filter(Arc::new(FilterSpec {
                is_async: self.is_async,
            })),
        }
    }
}

/// Loads addons from TOML descriptor files.
///
/// Relative module paths are resolved against `base_dir`.
#[derive(Debug, Clone)]
pub struct DescriptorFileLoader {
    base_dir: PathBuf,
}

impl DescriptorFileLoader {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    async fn read(&self, kind: AddonKind, name: &str, module_path: &Path) -> Result<Addon> {
        let path = self.base_dir.join(module_path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read addon descriptor {}", path.display()))?;
        let file: AddonFile = toml::from_str(&content)
            .with_context(|| format!("Invalid addon descriptor {}", path.display()))?;
        tracing::trace!("Read {} descriptor {}: {:?}", kind, path.display(), file);
        Ok(file.into_addon(kind, name))
    }
}

impl AddonLoader for DescriptorFileLoader {
    fn load<'a>(
        &'a self,
        kind: AddonKind,
        name: &'a str,
        module_path: &'a Path,
    ) -> BoxFuture<'a, Result<Addon>> {
        self.read(kind, name, module_path).boxed()
    }
}
