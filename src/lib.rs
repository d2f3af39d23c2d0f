//! tmpldeps - template dependency resolver and precompiler for bundlers
//!
//! Given one template's source, tmpldeps works out everything the template
//! depends on and returns it together with the template precompiled to a
//! self-contained JavaScript module:
//!
//! - sub-templates pulled in with `extends`, `include`, `import` and
//!   `from … import`, resolved against ordered search directories
//! - declared globals the template calls
//! - declared custom-tag extensions and filters the template uses
//! - assets referenced through `static("…")`, including concatenations such
//!   as `static("img/" + name + ".png")`, resolved against asset directories
//!   and rewritten in the precompiled output into runtime table lookups
//!
//! # Core Modules
//!
//! - [`template`] - Lexer, parser, syntax tree and per-call environment
//! - [`extract`] - Read-only traversals that collect references
//! - [`resolver`] - Concurrent, priority-ordered path resolution
//! - [`compiler`] - Precompilation to a JavaScript module
//! - [`rewrite`] - Asset expression rewriting in precompiled output
//! - [`process`] - The end-to-end pipeline and its manifest
//!
//! ## Supporting Modules
//!
//! - [`addons`] - Extension and filter descriptors and their loaders
//! - [`config`] - `tmpldeps.toml` configuration
//! - [`core`] - Error types and user-facing error rendering
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use tmpldeps::addons::StaticAddonLoader;
//! use tmpldeps::process::{ProcessOptions, Processor};
//! use tmpldeps::resolver::FsProbe;
//!
//! # async fn example() -> Result<(), tmpldeps::core::LoaderError> {
//! let options = ProcessOptions {
//!     search_paths: vec![PathBuf::from("templates")],
//!     assets_paths: vec![PathBuf::from("assets")],
//!     ..ProcessOptions::default()
//! };
//! let processor = Processor::new(FsProbe, StaticAddonLoader::new());
//! let source = r#"{% extends "base.njk" %}{% block body %}<img src="{{ static("logo.png") }}">{% endblock %}"#;
//! let manifest = processor.process("page.njk", source, &options).await?;
//! for dep in &manifest.dependencies {
//!     println!("{} -> {}", dep.name, dep.path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod addons;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod core;
pub mod extract;
pub mod process;
pub mod resolver;
pub mod rewrite;
pub mod template;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
