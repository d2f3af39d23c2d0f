//! Template language front end.
//!
//! This module turns template source text into a [`Template`] syntax tree. It
//! understands enough of the language to locate every cross-reference a
//! template can make:
//!
//! - `extends`, `include`, `import` and `from … import` directives
//! - function calls such as `static("img/logo.png")`
//! - filter applications (`value | upper`, `{% filter %}` blocks)
//! - custom tags provided by registered [`Extension`]s
//!
//! Parsing is a pure function of the source and an [`Environment`]. The
//! environment is built once per invocation through [`EnvironmentBuilder`]
//! and never mutated afterwards, so custom tags registered for one template
//! can never leak into another.
//!
//! # Examples
//!
//! ```rust
//! use tmpldeps::template::{Environment, NodeCategory};
//!
//! let env = Environment::builder().build();
//! let tree = env.parse("page.njk", r#"{% include "partials/nav.njk" %}"#)?;
//! assert_eq!(tree.find_all(NodeCategory::Inclusion).len(), 1);
//! # Ok::<(), tmpldeps::template::ParseError>(())
//! ```

pub mod ast;
pub mod environment;
pub mod extension;
pub mod lexer;
pub mod parser;

pub use ast::{Literal, Node, NodeCategory, NodeKind, Span, Template};
pub use environment::{Environment, EnvironmentBuilder, EnvironmentOptions, TagSyntax};
pub use extension::{Extension, ExtensionSite, TagExtension};
pub use parser::Parser;

/// Error raised when template source violates the grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    /// Identifier of the template being parsed
    pub template: String,
    /// What went wrong
    pub message: String,
    /// 1-based line, when known
    pub line: Option<usize>,
    /// 1-based column, when known
    pub col: Option<usize>,
}

impl ParseError {
    pub fn new(
        template: &str,
        message: impl Into<String>,
        line: Option<usize>,
        col: Option<usize>,
    ) -> Self {
        Self {
            template: template.to_string(),
            message: message.into(),
            line,
            col,
        }
    }
}

/// Parse `source` into a syntax tree using the grammar of `env`.
///
/// # Errors
///
/// Returns a [`ParseError`] carrying the template identifier and the location
/// of the offending token.
pub fn parse(name: &str, source: &str, env: &Environment) -> Result<Template, ParseError> {
    let tokens = lexer::tokenize(name, source, env.options())?;
    let mut parser = Parser::new(name, tokens, env);
    let body = parser.parse_root()?;
    tracing::trace!("Parsed template '{}' into {} top-level nodes", name, body.len());
    Ok(Template {
        name: name.to_string(),
        body,
    })
}
