//! Syntax tree produced by the parser.
//!
//! Nodes form a closed enumeration. Traversal never inspects node identity at
//! runtime; it matches on [`NodeKind`], and callers that only care about the
//! cross-reference shapes ask for a node's [`NodeCategory`].

use crate::addons::ExtensionRef;

/// 1-based source location of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

/// A parsed template: its identifier and top-level nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

impl Literal {
    /// Text of the literal as it would appear after string coercion.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    /// `~` string concatenation
    Concat,
    And,
    Or,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub(crate) fn from_token(op: &str) -> Option<Self> {
        Some(match op {
            "==" => Self::Eq,
            "===" => Self::StrictEq,
            "!=" => Self::Ne,
            "!==" => Self::StrictNe,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            _ => return None,
        })
    }
}

/// A macro parameter with an optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Node>,
}

/// Keyword argument of a call, filter or extension tag.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordArg {
    pub name: String,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Literal text between tags.
    TemplateData(String),
    /// `{{ … }}` or a run of template data.
    Output(Vec<Node>),
    If {
        cond: Box<Node>,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },
    For {
        targets: Vec<String>,
        iter: Box<Node>,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },
    Set {
        targets: Vec<String>,
        value: Box<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    Macro {
        name: String,
        params: Vec<Param>,
        body: Vec<Node>,
    },
    /// Body passed to a macro invoked with `{% call %}`.
    Caller {
        params: Vec<Param>,
        body: Vec<Node>,
    },
    /// Captured output of a node list, used by block `set` and `filter`.
    Capture(Vec<Node>),
    Extends {
        template: Box<Node>,
    },
    Include {
        template: Box<Node>,
        ignore_missing: bool,
    },
    Import {
        template: Box<Node>,
        target: String,
        with_context: bool,
    },
    FromImport {
        template: Box<Node>,
        names: Vec<(String, Option<String>)>,
        with_context: bool,
    },
    CallExtension {
        ext: ExtensionRef,
        method: String,
        args: Vec<Node>,
        kwargs: Vec<KeywordArg>,
        bodies: Vec<Vec<Node>>,
        is_async: bool,
    },

    Literal(Literal),
    Symbol(String),
    Group(Box<Node>),
    Array(Vec<Node>),
    Dict(Vec<(Node, Node)>),
    Lookup {
        target: Box<Node>,
        key: Box<Node>,
    },
    FunCall {
        callee: Box<Node>,
        args: Vec<Node>,
        kwargs: Vec<KeywordArg>,
    },
    Filter {
        name: String,
        target: Box<Node>,
        args: Vec<Node>,
        kwargs: Vec<KeywordArg>,
    },
    Is {
        target: Box<Node>,
        test: String,
        args: Vec<Node>,
        negated: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Compare {
        first: Box<Node>,
        rest: Vec<(CompareOp, Node)>,
    },
    InlineIf {
        cond: Box<Node>,
        body: Box<Node>,
        else_body: Option<Box<Node>>,
    },
}

/// Coarse node classification used by reference extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    /// `extends`, `include`, `import` and `from … import`
    Inclusion,
    FunctionCall,
    FilterCall,
    ExtensionCall,
    /// Binary `+`
    Add,
    Literal,
    Symbol,
    Other,
}

impl Node {
    #[must_use]
    pub fn new(span: Span, kind: NodeKind) -> Self {
        Self {
            span,
            kind,
        }
    }

    #[must_use]
    pub fn category(&self) -> NodeCategory {
        match &self.kind {
            NodeKind::Extends { .. }
            | NodeKind::Include { .. }
            | NodeKind::Import { .. }
            | NodeKind::FromImport { .. } => NodeCategory::Inclusion,
            NodeKind::FunCall { .. } => NodeCategory::FunctionCall,
            NodeKind::Filter { .. } => NodeCategory::FilterCall,
            NodeKind::CallExtension { .. } => NodeCategory::ExtensionCall,
            NodeKind::Binary {
                op: BinaryOp::Add,
                ..
            } => NodeCategory::Add,
            NodeKind::Literal(_) => NodeCategory::Literal,
            NodeKind::Symbol(_) => NodeCategory::Symbol,
            _ => NodeCategory::Other,
        }
    }

    /// Human-readable name of the node kind, used in error messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            NodeKind::TemplateData(_) => "template data",
            NodeKind::Output(_) => "output",
            NodeKind::If { .. } => "if statement",
            NodeKind::For { .. } => "for loop",
            NodeKind::Set { .. } => "set statement",
            NodeKind::Block { .. } => "block",
            NodeKind::Macro { .. } => "macro",
            NodeKind::Caller { .. } => "caller",
            NodeKind::Capture(_) => "capture",
            NodeKind::Extends { .. } => "extends",
            NodeKind::Include { .. } => "include",
            NodeKind::Import { .. } => "import",
            NodeKind::FromImport { .. } => "from-import",
            NodeKind::CallExtension { .. } => "extension call",
            NodeKind::Literal(_) => "literal",
            NodeKind::Symbol(_) => "symbol",
            NodeKind::Group(_) => "parenthesized expression",
            NodeKind::Array(_) => "array",
            NodeKind::Dict(_) => "dict",
            NodeKind::Lookup { .. } => "member lookup",
            NodeKind::FunCall { .. } => "function call",
            NodeKind::Filter { .. } => "filter",
            NodeKind::Is { .. } => "test",
            NodeKind::Unary { .. } => "unary operation",
            NodeKind::Binary { .. } => "binary operation",
            NodeKind::Compare { .. } => "comparison",
            NodeKind::InlineIf { .. } => "inline if",
        }
    }

    /// Direct children in source order.
    #[must_use]
    pub fn children(&self) -> Vec<&Node> {
        fn kw(kwargs: &[KeywordArg]) -> impl Iterator<Item = &Node> {
            kwargs.iter().map(|k| &k.value)
        }
        fn params(params: &[Param]) -> impl Iterator<Item = &Node> {
            params.iter().filter_map(|p| p.default.as_ref())
        }

        match &self.kind {
            NodeKind::TemplateData(_) | NodeKind::Literal(_) | NodeKind::Symbol(_) => Vec::new(),
            NodeKind::Output(nodes) | NodeKind::Capture(nodes) | NodeKind::Array(nodes) => {
                nodes.iter().collect()
            }
            NodeKind::If {
                cond,
                body,
                else_body,
            } => std::iter::once(cond.as_ref()).chain(body).chain(else_body).collect(),
            NodeKind::For {
                iter,
                body,
                else_body,
                ..
            } => std::iter::once(iter.as_ref()).chain(body).chain(else_body).collect(),
            NodeKind::Set {
                value,
                ..
            } => vec![value.as_ref()],
            NodeKind::Block {
                body,
                ..
            } => body.iter().collect(),
            NodeKind::Macro {
                params: p,
                body,
                ..
            }
            | NodeKind::Caller {
                params: p,
                body,
            } => params(p).chain(body).collect(),
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
            } => vec![template.as_ref()],
            NodeKind::CallExtension {
                args,
                kwargs,
                bodies,
                ..
            } => args.iter().chain(kw(kwargs)).chain(bodies.iter().flatten()).collect(),
            NodeKind::Group(inner) => vec![inner.as_ref()],
            NodeKind::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            NodeKind::Lookup {
                target,
                key,
            } => vec![target.as_ref(), key.as_ref()],
            NodeKind::FunCall {
                callee,
                args,
                kwargs,
            } => std::iter::once(callee.as_ref()).chain(args).chain(kw(kwargs)).collect(),
            NodeKind::Filter {
                target,
                args,
                kwargs,
                ..
            } => std::iter::once(target.as_ref()).chain(args).chain(kw(kwargs)).collect(),
            NodeKind::Is {
                target,
                args,
                ..
            } => std::iter::once(target.as_ref()).chain(args).collect(),
            NodeKind::Unary {
                operand,
                ..
            } => vec![operand.as_ref()],
            NodeKind::Binary {
                left,
                right,
                ..
            } => vec![left.as_ref(), right.as_ref()],
            NodeKind::Compare {
                first,
                rest,
            } => std::iter::once(first.as_ref()).chain(rest.iter().map(|(_, n)| n)).collect(),
            NodeKind::InlineIf {
                cond,
                body,
                else_body,
            } => {
                let mut nodes = vec![cond.as_ref(), body.as_ref()];
                if let Some(e) = else_body {
                    nodes.push(e.as_ref());
                }
                nodes
            }
        }
    }

    /// Name of a function-call callee when it is a plain symbol.
    #[must_use]
    pub fn callee_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::FunCall {
                callee,
                ..
            } => match &callee.kind {
                NodeKind::Symbol(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Template {
    /// Every node of the tree in pre-order, document order.
    #[must_use]
    pub fn walk(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = self.body.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children().into_iter().rev());
        }
        out
    }

    /// Every node of the given category, in document order.
    #[must_use]
    pub fn find_all(&self, category: NodeCategory) -> Vec<&Node> {
        self.walk().into_iter().filter(|n| n.category() == category).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Node {
        Node::new(Span::default(), NodeKind::Symbol(name.into()))
    }

    fn lit(value: &str) -> Node {
        Node::new(Span::default(), NodeKind::Literal(Literal::Str(value.into())))
    }

    #[test]
    fn test_walk_is_preorder_document_order() {
        let add = Node::new(
            Span::default(),
            NodeKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(lit("a")),
                right: Box::new(sym("b")),
            },
        );
        let tree = Template {
            name: "t".into(),
            body: vec![Node::new(Span::default(), NodeKind::Output(vec![add])), sym("c")],
        };

        let categories: Vec<_> = tree.walk().iter().map(|n| n.category()).collect();
        assert_eq!(
            categories,
            vec![
                NodeCategory::Other,
                NodeCategory::Add,
                NodeCategory::Literal,
                NodeCategory::Symbol,
                NodeCategory::Symbol
            ]
        );
        assert_eq!(tree.find_all(NodeCategory::Symbol).len(), 2);
    }

    #[test]
    fn test_only_plain_add_is_add_category() {
        let concat = Node::new(
            Span::default(),
            NodeKind::Binary {
                op: BinaryOp::Concat,
                left: Box::new(lit("a")),
                right: Box::new(lit("b")),
            },
        );
        assert_eq!(concat.category(), NodeCategory::Other);
    }
}
