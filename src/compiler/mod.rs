//! Precompiler: syntax tree to a self-contained module string.
//!
//! The emitted text binds one local variable to an object holding a render
//! function per block plus `root`:
//!
//! ```text
//! var template = (function() {
//! function root(env, context, frame, runtime) {
//! ...
//! }
//! return {
//! root: root
//! };
//! })();
//! ```
//!
//! Render functions return the output string. When any filter or extension
//! used by the template is asynchronous every render function is emitted as
//! an `async function` and those calls are awaited.
//!
//! Literal and symbol forms are part of the contract with [`crate::rewrite`]:
//! string literals are JSON-quoted by [`js_literal`], binary `+` is emitted as
//! `left + right` with no added parentheses, and symbols become either a frame
//! temporary `t_N` or [`context_lookup`].
//!
//! # Examples
//!
//! ```rust
//! use tmpldeps::compiler::precompile;
//! use tmpldeps::template::Environment;
//!
//! let env = Environment::builder().build();
//! let module = precompile("hello.njk", "Hello {{ name }}", &env, "template")?;
//! assert!(module.starts_with("var template = (function() {"));
//! assert!(module.contains(r#"runtime.contextOrFrameLookup(context, frame, "name")"#));
//! # Ok::<(), tmpldeps::core::LoaderError>(())
//! ```

mod codegen;

use strsim::levenshtein;

use crate::core::LoaderError;
use crate::template::{Environment, Literal, Template};

use codegen::CodeGen;

/// Filters the target runtime always provides.
pub const BUILTIN_FILTERS: &[&str] = &[
    "abs",
    "batch",
    "capitalize",
    "center",
    "d",
    "default",
    "dictsort",
    "dump",
    "e",
    "escape",
    "first",
    "float",
    "forceescape",
    "groupby",
    "indent",
    "int",
    "join",
    "last",
    "length",
    "list",
    "lower",
    "nl2br",
    "random",
    "reject",
    "rejectattr",
    "replace",
    "reverse",
    "round",
    "safe",
    "select",
    "selectattr",
    "slice",
    "sort",
    "string",
    "striptags",
    "sum",
    "title",
    "trim",
    "truncate",
    "upper",
    "urlencode",
    "urlize",
    "wordcount",
];

/// Maximum edit distance, as a percentage of the name length, for a
/// "did you mean" suggestion.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Quote `value` as a string literal of the emitted code.
#[must_use]
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.escape_default()))
}

/// The emitted form of a literal.
#[must_use]
pub fn js_literal(literal: &Literal) -> String {
    match literal {
        Literal::Str(s) => js_string(s),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::None => "null".to_string(),
    }
}

/// The emitted form of a symbol that is not bound in a local frame.
#[must_use]
pub fn context_lookup(name: &str) -> String {
    format!("runtime.contextOrFrameLookup(context, frame, {})", js_string(name))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Closest known name to `target`, if any is close enough.
pub(crate) fn suggest<'a>(target: &str, known: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let limit = (target.len() * SIMILARITY_THRESHOLD_PERCENT / 100).max(1);
    known
        .into_iter()
        .map(|name| (levenshtein(target, name), name))
        .filter(|(distance, _)| *distance <= limit)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, name)| name)
}

/// Compile a parsed template into module text bound to `var_name`.
///
/// # Errors
///
/// Returns [`LoaderError::Compile`] naming the template when a filter is
/// neither built in nor declared, when an extension call site matches no
/// declared extension, or when `var_name` is not a valid identifier.
pub fn compile_template(
    tree: &Template,
    env: &Environment,
    var_name: &str,
) -> Result<String, LoaderError> {
    if !is_identifier(var_name) {
        return Err(LoaderError::Compile {
            template: tree.name.clone(),
            reason: format!("'{var_name}' is not a valid module variable name"),
        });
    }

    let is_async = codegen::requires_async(tree, env);
    tracing::debug!(
        "Compiling template '{}' into `{}`{}",
        tree.name,
        var_name,
        if is_async { " (async)" } else { "" }
    );
    CodeGen::new(&tree.name, env, is_async).compile_root(tree, var_name)
}

/// Parse `source` and compile it.
///
/// # Errors
///
/// Grammar violations are reported as [`LoaderError::Compile`] naming the
/// template, with the parser's location in the reason. See also
/// [`compile_template`].
pub fn precompile(
    name: &str,
    source: &str,
    env: &Environment,
    var_name: &str,
) -> Result<String, LoaderError> {
    let tree = env.parse(name, source).map_err(|e| {
        let location = match (e.line, e.col) {
            (Some(line), Some(col)) => format!(" (line {line}, column {col})"),
            (Some(line), None) => format!(" (line {line})"),
            _ => String::new(),
        };
        LoaderError::Compile {
            template: name.to_string(),
            reason: format!("{}{location}", e.message),
        }
    })?;
    compile_template(&tree, env, var_name)
}
