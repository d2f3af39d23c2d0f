//! Extension and filter addons.
//!
//! Callers declare addons as a mapping from name to module path. Before a
//! template is parsed every declared addon is materialized through an
//! [`AddonLoader`], producing [`AddonDescriptor`]s that carry the declared
//! name, the module path and the live instance. Loading happens first because
//! extensions change the grammar the parser accepts.
//!
//! Each descriptor is stamped with a fresh [`AddonHandle`]. Extension call
//! sites in the syntax tree reference their extension through an
//! [`ExtensionRef`], either by declared name or by that handle, and are
//! matched against descriptors structurally.

mod loader;

pub use loader::{AddonFile, DescriptorFileLoader, StaticAddonLoader};

use futures::future::{BoxFuture, try_join_all};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::{AddonKind, LoaderError};
use crate::template::Extension;

/// Opaque identity of one loaded addon instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct AddonHandle(Uuid);

impl AddonHandle {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AddonHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AddonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an extension call site names the extension it invokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExtensionRef {
    /// The name the extension was declared with
    ByName(String),
    /// The live instance, for tags that register themselves directly
    ByInstance(AddonHandle),
}

impl fmt::Display for ExtensionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => f.write_str(name),
            Self::ByInstance(handle) => write!(f, "<instance {handle}>"),
        }
    }
}

/// A value filter.
///
/// The loader never runs filters. All it needs to know is whether calls must
/// be awaited in the precompiled output.
pub trait Filter: Send + Sync + fmt::Debug {
    fn is_async(&self) -> bool {
        false
    }
}

/// Filter described only by its calling convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub is_async: bool,
}

impl FilterSpec {
    #[must_use]
    pub const fn asynchronous() -> Self {
        Self {
            is_async: true,
        }
    }
}

impl Filter for FilterSpec {
    fn is_async(&self) -> bool {
        self.is_async
    }
}

/// A declared addon together with its loaded instance.
pub struct AddonDescriptor<T: ?Sized> {
    /// Declared name
    pub name: String,
    /// Module path the addon was declared with
    pub module_path: PathBuf,
    /// Identity of `instance`
    pub handle: AddonHandle,
    pub instance: Arc<T>,
}

pub type ExtensionDescriptor = AddonDescriptor<dyn Extension>;
pub type FilterDescriptor = AddonDescriptor<dyn Filter>;

impl<T: ?Sized> AddonDescriptor<T> {
    pub fn new(name: impl Into<String>, module_path: impl Into<PathBuf>, instance: Arc<T>) -> Self {
        Self {
            name: name.into(),
            module_path: module_path.into(),
            handle: AddonHandle::new(),
            instance,
        }
    }
}

impl<T: ?Sized> Clone for AddonDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            module_path: self.module_path.clone(),
            handle: self.handle,
            instance: Arc::clone(&self.instance),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for AddonDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonDescriptor")
            .field("name", &self.name)
            .field("module_path", &self.module_path)
            .field("handle", &self.handle)
            .field("instance", &self.instance)
            .finish()
    }
}

impl ExtensionDescriptor {
    /// Whether a call site's extension identity refers to this descriptor.
    #[must_use]
    pub fn matches(&self, site: &ExtensionRef) -> bool {
        match site {
            ExtensionRef::ByName(name) => *name == self.name,
            ExtensionRef::ByInstance(handle) => *handle == self.handle,
        }
    }
}

/// A loaded addon module.
#[derive(Debug, Clone)]
pub enum Addon {
    Extension(Arc<dyn Extension>),
    Filter(Arc<dyn Filter>),
}

/// Materializes addon instances from module paths.
pub trait AddonLoader: Send + Sync {
    /// Load the addon declared as `name` at `module_path`.
    fn load<'a>(
        &'a self,
        kind: AddonKind,
        name: &'a str,
        module_path: &'a Path,
    ) -> BoxFuture<'a, anyhow::Result<Addon>>;
}

fn load_error(kind: AddonKind, name: &str, module_path: &Path, reason: String) -> LoaderError {
    LoaderError::AddonLoad {
        kind,
        name: name.to_string(),
        module_path: module_path.display().to_string(),
        reason,
    }
}

async fn load_one(
    loader: &dyn AddonLoader,
    kind: AddonKind,
    name: &str,
    module_path: &Path,
) -> Result<Addon, LoaderError> {
    tracing::debug!("Loading {} '{}' from {}", kind, name, module_path.display());
    loader
        .load(kind, name, module_path)
        .await
        .map_err(|e| load_error(kind, name, module_path, format!("{e:#}")))
}

/// Load every declared extension concurrently, in declaration order.
///
/// # Errors
///
/// Fails with [`LoaderError::AddonLoad`] on the first extension that cannot
/// be loaded. Outstanding loads are dropped.
pub async fn load_extensions(
    loader: &dyn AddonLoader,
    declared: &BTreeMap<String, PathBuf>,
) -> Result<Vec<ExtensionDescriptor>, LoaderError> {
    let loads = declared.iter().map(|(name, path)| async move {
        match load_one(loader, AddonKind::Extension, name, path).await? {
            Addon::Extension(instance) => Ok(ExtensionDescriptor::new(name.clone(), path.clone(), instance)),
            Addon::Filter(_) => Err(load_error(
                AddonKind::Extension,
                name,
                path,
                "module provides a filter, not an extension".to_string(),
            )),
        }
    });
    try_join_all(loads).await
}

/// Load every declared filter concurrently, in declaration order.
///
/// # Errors
///
/// Fails with [`LoaderError::AddonLoad`] on the first filter that cannot be
/// loaded.
pub async fn load_filters(
    loader: &dyn AddonLoader,
    declared: &BTreeMap<String, PathBuf>,
) -> Result<Vec<FilterDescriptor>, LoaderError> {
    let loads = declared.iter().map(|(name, path)| async move {
        match load_one(loader, AddonKind::Filter, name, path).await? {
            Addon::Filter(instance) => Ok(FilterDescriptor::new(name.clone(), path.clone(), instance)),
            Addon::Extension(_) => Err(load_error(
                AddonKind::Filter,
                name,
                path,
                "module provides an extension, not a filter".to_string(),
            )),
        }
    });
    try_join_all(loads).await
}
