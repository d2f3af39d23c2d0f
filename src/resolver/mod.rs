//! Path resolution against ordered search directories.
//!
//! A logical reference such as `"partials/header.njk"` is expanded into one
//! candidate path per search directory ([`get_possible_paths`]). All
//! candidates are then probed concurrently and the highest-priority existing
//! one wins ([`resolve`]). Priority is positional: an earlier directory always
//! beats a later one, however the existence checks happen to interleave.
//!
//! # Concurrency
//!
//! - Within one reference, every candidate is probed at once through a
//!   [`FuturesUnordered`]. The answer is returned as soon as every candidate
//!   ahead of an existing one is known to be missing. Probes still in flight
//!   at that point are dropped.
//! - Across references, [`resolve_all`] joins one future per reference with
//!   [`try_join_all`]. The first failure is returned immediately and the
//!   remaining resolutions are dropped (fail-fast).
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use tmpldeps::core::ReferenceKind;
//! use tmpldeps::resolver::{FsProbe, get_possible_paths, resolve_all};
//!
//! # async fn example() -> Result<(), tmpldeps::core::LoaderError> {
//! let dirs = vec![PathBuf::from("templates"), PathBuf::from("vendor/templates")];
//! let refs = get_possible_paths(&["layout.njk"], &dirs);
//! let resolved = resolve_all(&FsProbe, ReferenceKind::Template, &refs).await?;
//! println!("{} -> {}", resolved[0].0, resolved[0].1.display());
//! # Ok(())
//! # }
//! ```

use futures::future::{BoxFuture, FutureExt, try_join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};

use crate::core::{LoaderError, ReferenceKind};

/// Asynchronous existence check.
pub trait PathProbe: Send + Sync {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool>;
}

/// [`PathProbe`] backed by `tokio::fs::metadata`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        async move {
            match tokio::fs::metadata(path).await {
                Ok(_) => true,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::debug!("Treating {} as missing: {}", path.display(), e);
                    }
                    false
                }
            }
        }
        .boxed()
    }
}

/// A logical name and its candidate paths in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateReference {
    pub name: String,
    pub candidates: Vec<PathBuf>,
}

/// No candidate of a reference exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("none of {} candidate paths exist", .searched.len())]
pub struct NotFound {
    pub searched: Vec<PathBuf>,
}

fn absolute(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(dir),
        Err(e) => {
            tracing::debug!("Cannot read current directory, using {} as given: {}", dir.display(), e);
            dir.to_path_buf()
        }
    }
}

/// Expand every name against every directory, in order.
///
/// A leading `/` is dropped, so absolute names still resolve inside each
/// directory.
#[must_use]
pub fn get_possible_paths<S: AsRef<str>>(names: &[S], dirs: &[PathBuf]) -> Vec<TemplateReference> {
    let dirs: Vec<PathBuf> = dirs.iter().map(|d| absolute(d)).collect();
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let relative = name.trim_start_matches('/');
            TemplateReference {
                name: name.to_string(),
                candidates: dirs
                    .iter()
                    .map(|dir| if matches!(relative, "" | ".") { dir.clone() } else { dir.join(relative) })
                    .collect(),
            }
        })
        .collect()
}

/// The first candidate that exists.
///
/// # Errors
///
/// Returns [`NotFound`] listing every candidate when none exist, including
/// when `candidates` is empty.
pub async fn resolve(probe: &dyn PathProbe, candidates: &[PathBuf]) -> Result<PathBuf, NotFound> {
    let mut probes: FuturesUnordered<_> = candidates
        .iter()
        .enumerate()
        .map(|(i, path)| probe.exists(path).map(move |exists| (i, exists)))
        .collect();

    // Outcome per candidate; `best` is the first one not known to be missing.
    let mut known: Vec<Option<bool>> = vec![None; candidates.len()];
    let mut best = 0;

    while let Some((i, exists)) = probes.next().await {
        known[i] = Some(exists);
        while known.get(best) == Some(&Some(false)) {
            best += 1;
        }
        match known.get(best) {
            Some(Some(true)) => return Ok(candidates[best].clone()),
            None => break,
            _ => {}
        }
    }

    Err(NotFound {
        searched: candidates.to_vec(),
    })
}

/// Resolve every reference concurrently, preserving input order.
///
/// # Errors
///
/// Fails fast with [`LoaderError::NotFound`] naming the first reference found
/// to be missing.
pub async fn resolve_all(
    probe: &dyn PathProbe,
    kind: ReferenceKind,
    references: &[TemplateReference],
) -> Result<Vec<(String, PathBuf)>, LoaderError> {
    let resolutions = references.iter().map(|reference| async move {
        match resolve(probe, &reference.candidates).await {
            Ok(path) => {
                tracing::debug!("Resolved {} '{}' to {}", kind, reference.name, path.display());
                Ok((reference.name.clone(), path))
            }
            Err(NotFound {
                searched,
            }) => Err(LoaderError::NotFound {
                kind,
                name: reference.name.clone(),
                searched,
            }),
        }
    });
    try_join_all(resolutions).await
}
