//! Custom tag extensions.
//!
//! An extension claims one or more tag names. When the parser meets
//! `{% <tag> … %}` for a claimed tag it hands control to the extension's
//! [`Extension::parse`] hook, which consumes tokens through the public
//! [`Parser`] helpers and returns the node to insert, normally a
//! [`NodeKind::CallExtension`].

use std::fmt;

use super::ast::{Node, NodeKind, Span};
use super::{ParseError, Parser};
use crate::addons::{AddonHandle, ExtensionRef};

/// How the extension being invoked was registered.
///
/// Passed to [`Extension::parse`] so the hook can decide whether its call
/// sites reference the extension by declared name or by live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSite {
    pub name: String,
    pub handle: AddonHandle,
}

impl ExtensionSite {
    #[must_use]
    pub fn by_name(&self) -> ExtensionRef {
        ExtensionRef::ByName(self.name.clone())
    }

    #[must_use]
    pub fn by_instance(&self) -> ExtensionRef {
        ExtensionRef::ByInstance(self.handle)
    }
}

/// A custom tag provider.
pub trait Extension: Send + Sync + fmt::Debug {
    /// Tag names this extension handles.
    fn tags(&self) -> Vec<String>;

    /// Parse one tag occurrence. The parser is positioned on the tag name.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the tag's arguments or body are malformed.
    fn parse(&self, parser: &mut Parser<'_>, site: &ExtensionSite) -> Result<Node, ParseError>;

    /// Whether the extension's `run` method is asynchronous.
    fn is_async(&self) -> bool {
        false
    }
}

/// Whether call sites carry the declared name or the instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    #[default]
    Name,
    Instance,
}

/// A general-purpose extension: `{% tag args %}` with an optional body
/// closed by `{% endtag %}`, compiled into a call of the extension's `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagExtension {
    tags: Vec<String>,
    has_body: bool,
    identity: Identity,
    is_async: bool,
}

impl TagExtension {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tags: vec![tag.into()],
            has_body: false,
            identity: Identity::Name,
            is_async: false,
        }
    }

    #[must_use]
    pub fn with_tags(tags: Vec<String>) -> Self {
        Self {
            tags,
            ..Self::new(String::new())
        }
    }

    #[must_use]
    pub fn with_body(mut self, has_body: bool) -> Self {
        self.has_body = has_body;
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn asynchronous(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }
}

impl Extension for TagExtension {
    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn parse(&self, parser: &mut Parser<'_>, site: &ExtensionSite) -> Result<Node, ParseError> {
        let tag = parser.next_token();
        let span = Span {
            line: tag.line,
            col: tag.col,
        };

        let (args, kwargs) = parser.parse_signature(true)?;
        parser.advance_after_block_end(&tag.value)?;

        let mut bodies = Vec::new();
        if self.has_body {
            let end_tag = format!("end{}", tag.value);
            bodies.push(parser.parse_until_blocks(&[end_tag.as_str()])?);
            parser.advance_after_block_end(&end_tag)?;
        }

        let ext = match self.identity {
            Identity::Name => site.by_name(),
            Identity::Instance => site.by_instance(),
        };

        Ok(Node::new(
            span,
            NodeKind::CallExtension {
                ext,
                method: "run".to_string(),
                args,
                kwargs,
                bodies,
                is_async: self.is_async,
            },
        ))
    }

    fn is_async(&self) -> bool {
        self.is_async
    }
}
