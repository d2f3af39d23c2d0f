//! Reconstruction of dynamic asset path expressions.
//!
//! An asset path such as `static("img/" + name + ".png")` cannot be resolved
//! to a single file at build time. The concatenation is flattened into an
//! ordered list of [`Fragment`]s so the expression can be rendered back to
//! text, matched in the precompiled output and replaced with a runtime lookup.

use std::fmt;

use crate::compiler::js_literal;
use crate::core::LoaderError;
use crate::template::ast::BinaryOp;
use crate::template::{Literal, Node, NodeKind};

/// One operand of a concatenation chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Literal(Literal),
    /// A bare variable name
    Variable(String),
}

impl Fragment {
    /// The fragment as it appears in the rendered expression.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Literal(literal) => js_literal(literal),
            Self::Variable(name) => name.clone(),
        }
    }
}

/// The argument of one `static(...)` call.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPath {
    /// A single string literal
    Static(String),
    /// Literal and variable fragments joined by `+`
    Dynamic(Vec<Fragment>),
}

impl AssetPath {
    /// Textual form, also used as the deduplication key.
    ///
    /// ```rust
    /// use tmpldeps::extract::{AssetPath, Fragment};
    /// use tmpldeps::template::Literal;
    ///
    /// let path = AssetPath::Dynamic(vec![
    ///     Fragment::Literal(Literal::Str("img/".into())),
    ///     Fragment::Variable("name".into()),
    ///     Fragment::Literal(Literal::Str(".png".into())),
    /// ]);
    /// assert_eq!(path.expression(), r#""img/" + name + ".png""#);
    /// ```
    #[must_use]
    pub fn expression(&self) -> String {
        match self {
            Self::Static(path) => js_literal(&Literal::Str(path.clone())),
            Self::Dynamic(fragments) => {
                fragments.iter().map(Fragment::render).collect::<Vec<_>>().join(" + ")
            }
        }
    }

    /// Variable names in left-to-right order.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Self::Static(_) => Vec::new(),
            Self::Dynamic(fragments) => fragments
                .iter()
                .filter_map(|f| match f {
                    Fragment::Variable(name) => Some(name.as_str()),
                    Fragment::Literal(_) => None,
                })
                .collect(),
        }
    }

    /// Name resolved against the asset directories.
    ///
    /// A static path resolves as written. A dynamic path resolves to the
    /// directory named by its leading literal text up to the last `/`, or to
    /// `.` when there is no such directory prefix.
    #[must_use]
    pub fn lookup_name(&self) -> String {
        match self {
            Self::Static(path) => path.clone(),
            Self::Dynamic(fragments) => {
                let prefix: String = fragments
                    .iter()
                    .map_while(|f| match f {
                        Fragment::Literal(literal) => Some(literal.as_text()),
                        Fragment::Variable(_) => None,
                    })
                    .collect();
                match prefix.rfind('/') {
                    Some(0) | None => ".".to_string(),
                    Some(end) => prefix[..end].to_string(),
                }
            }
        }
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}

/// Flatten a left-associated `+` chain into fragments.
///
/// # Errors
///
/// Returns [`LoaderError::UnsupportedExpression`] for any operand that is not
/// a literal, a symbol or another `+`.
pub fn flatten_concatenation(node: &Node, template: &str) -> Result<Vec<Fragment>, LoaderError> {
    let mut fragments = Vec::new();
    flatten_into(node, template, &mut fragments)?;
    Ok(fragments)
}

fn flatten_into(node: &Node, template: &str, out: &mut Vec<Fragment>) -> Result<(), LoaderError> {
    match &node.kind {
        NodeKind::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => {
            flatten_into(left, template, out)?;
            flatten_into(right, template, out)
        }
        NodeKind::Literal(literal) => {
            out.push(Fragment::Literal(literal.clone()));
            Ok(())
        }
        NodeKind::Symbol(name) => {
            out.push(Fragment::Variable(name.clone()));
            Ok(())
        }
        _ => Err(LoaderError::UnsupportedExpression {
            template: template.to_string(),
            node: node.describe().to_string(),
            line: node.span.line,
            col: node.span.col,
        }),
    }
}
