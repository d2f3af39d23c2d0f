//! Asset path rewriting of precompiled output.
//!
//! Every asset expression in the precompiled text is replaced with a lookup
//! into the runtime asset table [`ASSET_TABLE`], keyed by the entry's id:
//!
//! ```text
//! "img/logo.png"                                  → __tmpldepsAssets.get("<id>")
//! "img/" + runtime.contextOrFrameLookup(.., "n")  → __tmpldepsAssets.get("<id>", runtime.contextOrFrameLookup(.., "n"))
//! ```
//!
//! Dynamic lookups pass the compiled variable values along so the runtime can
//! rebuild the final path against the resolved asset. A variable compiles to a
//! context lookup, a frame temporary `t_<n>` inside loops and `set`, or `l_<name>`
//! for a macro or caller parameter.

use regex::{Captures, Regex};
use std::path::PathBuf;
use uuid::Uuid;

use crate::compiler::{context_lookup, js_literal, js_string};
use crate::extract::{AssetPath, Fragment};

/// Name of the runtime table the bundler populates with resolved assets.
pub const ASSET_TABLE: &str = "__tmpldepsAssets";

/// A resolved, deduplicated asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetEntry {
    /// Resolved path
    pub path: PathBuf,
    /// Runtime lookup key
    pub id: Uuid,
    pub reference: AssetPath,
}

impl AssetEntry {
    /// The lookup expression with the given extra arguments.
    fn lookup(&self, args: &[&str]) -> String {
        let mut call = format!("{ASSET_TABLE}.get({}", js_string(&self.id.to_string()));
        for arg in args {
            call.push_str(", ");
            call.push_str(arg);
        }
        call.push(')');
        call
    }
}

/// Pattern matching the compiled form of one fragment.
fn fragment_pattern(fragment: &Fragment) -> String {
    match fragment {
        Fragment::Literal(literal) => regex::escape(&js_literal(literal)),
        Fragment::Variable(name) => {
            format!("({}|t_[0-9]+|l_{}\\b)", regex::escape(&context_lookup(name)), regex::escape(name))
        }
    }
}

fn dynamic_pattern(fragments: &[Fragment]) -> Option<Regex> {
    let pattern =
        fragments.iter().map(fragment_pattern).collect::<Vec<_>>().join(&regex::escape(" + "));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Cannot build asset pattern from {}: {}", pattern, e);
            None
        }
    }
}

/// Replace every asset expression of `entries` in `precompiled`.
///
/// Entries are applied in order, each independently. With no entries the
/// input is returned unchanged.
#[must_use]
pub fn rewrite(precompiled: &str, entries: &[AssetEntry]) -> String {
    let mut output = precompiled.to_string();

    for entry in entries {
        match &entry.reference {
            AssetPath::Static(path) => {
                let literal = js_string(path);
                output = output.replace(&literal, &entry.lookup(&[]));
            }
            AssetPath::Dynamic(fragments) => {
                let Some(re) = dynamic_pattern(fragments) else {
                    continue;
                };
                let arity = entry.reference.variables().len();
                output = re
                    .replace_all(&output, |caps: &Captures<'_>| {
                        let args: Vec<&str> = (1..=arity)
                            .filter_map(|i| caps.get(i).map(|m| m.as_str()))
                            .collect();
                        entry.lookup(&args)
                    })
                    .into_owned();
            }
        }
        tracing::trace!("Rewrote asset {} to id {}", entry.reference, entry.id);
    }

    output
}
