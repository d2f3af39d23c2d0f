//! Reference extraction over a parsed template.
//!
//! Every traversal here is read-only and works on the same [`Template`]. The
//! four reference categories are:
//!
//! - inclusion directives ([`get_templates`])
//! - calls of declared globals ([`get_globals`])
//! - filter applications ([`get_filters`])
//! - custom-tag call sites ([`get_extensions`])
//!
//! Asset references made through the reserved [`ASSET_FUNCTION`] are
//! collected by [`get_assets`].

pub mod dynamic;

pub use dynamic::{AssetPath, Fragment, flatten_concatenation};

use std::collections::BTreeMap;

use crate::addons::{ExtensionDescriptor, FilterDescriptor};
use crate::core::LoaderError;
use crate::template::ast::BinaryOp;
use crate::template::{Literal, Node, NodeCategory, NodeKind, Template};

/// Name of the function that marks an asset reference.
pub const ASSET_FUNCTION: &str = "static";

/// Keep each candidate for which `predicate` matches some node of `category`.
///
/// The result follows candidate order, not traversal order.
pub fn get_usages_of<T, F>(
    tree: &Template,
    category: NodeCategory,
    candidates: impl IntoIterator<Item = T>,
    predicate: F,
) -> Vec<T>
where
    F: Fn(&T, &Node) -> bool,
{
    let nodes = tree.find_all(category);
    candidates.into_iter().filter(|candidate| nodes.iter().any(|n| predicate(candidate, n))).collect()
}

/// Literal target names of every inclusion directive, in document order.
///
/// Duplicates are preserved. Targets computed at render time cannot be
/// resolved ahead of time and are skipped with a warning.
#[must_use]
pub fn get_templates(tree: &Template) -> Vec<String> {
    let mut names = Vec::new();
    for node in tree.find_all(NodeCategory::Inclusion) {
        let target = match &node.kind {
            NodeKind::Extends {
                template,
            }
            | NodeKind::Include {
                template,
                ..
            }
            | NodeKind::Import {
                template,
                ..
            }
            | NodeKind::FromImport {
                template,
                ..
            } => template,
            _ => continue,
        };
        match &target.kind {
            NodeKind::Literal(Literal::Str(name)) => names.push(name.clone()),
            _ => tracing::warn!(
                "Skipping {} with non-literal target in '{}' at line {}, column {}",
                node.describe(),
                tree.name,
                node.span.line,
                node.span.col
            ),
        }
    }
    names
}

/// Declared globals called as `name(...)` somewhere in the tree.
#[must_use]
pub fn get_globals(tree: &Template, globals: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
    get_usages_of(tree, NodeCategory::FunctionCall, globals.keys(), |name, node| {
        node.callee_name() == Some(name.as_str())
    })
    .into_iter()
    .cloned()
    .collect()
}

/// Declared filters applied somewhere in the tree, matched by name.
#[must_use]
pub fn get_filters(tree: &Template, filters: &[FilterDescriptor]) -> Vec<FilterDescriptor> {
    get_usages_of(tree, NodeCategory::FilterCall, filters, |descriptor, node| {
        matches!(&node.kind, NodeKind::Filter { name, .. } if *name == descriptor.name)
    })
    .into_iter()
    .cloned()
    .collect()
}

/// Declared extensions invoked somewhere in the tree, by name or instance.
#[must_use]
pub fn get_extensions(tree: &Template, extensions: &[ExtensionDescriptor]) -> Vec<ExtensionDescriptor> {
    get_usages_of(tree, NodeCategory::ExtensionCall, extensions, |descriptor, node| {
        matches!(&node.kind, NodeKind::CallExtension { ext, .. } if descriptor.matches(ext))
    })
    .into_iter()
    .cloned()
    .collect()
}

/// Asset paths passed to [`ASSET_FUNCTION`], in document order.
///
/// The first argument must be a string literal or a `+` chain; calls with
/// any other argument shape are skipped with a warning.
///
/// # Errors
///
/// Returns [`LoaderError::UnsupportedExpression`] when a `+` chain contains
/// an operand other than a literal or a variable.
pub fn get_assets(tree: &Template) -> Result<Vec<AssetPath>, LoaderError> {
    let mut assets = Vec::new();
    for call in tree.find_all(NodeCategory::FunctionCall) {
        if call.callee_name() != Some(ASSET_FUNCTION) {
            continue;
        }
        let NodeKind::FunCall {
            args,
            ..
        } = &call.kind
        else {
            continue;
        };

        match args.first().map(|arg| &arg.kind) {
            Some(NodeKind::Literal(Literal::Str(path))) => assets.push(AssetPath::Static(path.clone())),
            Some(NodeKind::Binary {
                op: BinaryOp::Add,
                ..
            }) => {
                let fragments = flatten_concatenation(&args[0], &tree.name)?;
                assets.push(AssetPath::Dynamic(fragments));
            }
            other => tracing::warn!(
                "Skipping {}() call in '{}' at line {}, column {}: argument is {}",
                ASSET_FUNCTION,
                tree.name,
                call.span.line,
                call.span.col,
                other.map_or("missing", |_| args[0].describe())
            ),
        }
    }
    Ok(assets)
}
