//! Per-invocation template environment.
//!
//! An [`Environment`] bundles everything the parser and compiler need: parser
//! options, search directories, loaded extensions and filters, and declared
//! globals. It is assembled with [`EnvironmentBuilder`] and is read-only once
//! built.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use super::{ParseError, Template};
use crate::addons::{ExtensionDescriptor, ExtensionRef, FilterDescriptor};

/// Tag delimiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagSyntax {
    pub block_start: String,
    pub block_end: String,
    pub variable_start: String,
    pub variable_end: String,
    pub comment_start: String,
    pub comment_end: String,
}

impl Default for TagSyntax {
    fn default() -> Self {
        Self {
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            comment_start: "{#".to_string(),
            comment_end: "#}".to_string(),
        }
    }
}

impl TagSyntax {
    /// Check that no delimiter is empty and that the three openers differ.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("block_start", &self.block_start),
            ("block_end", &self.block_end),
            ("variable_start", &self.variable_start),
            ("variable_end", &self.variable_end),
            ("comment_start", &self.comment_start),
            ("comment_end", &self.comment_end),
        ];
        if let Some((name, _)) = all.iter().find(|(_, value)| value.is_empty()) {
            return Err(format!("tag delimiter `{name}` must not be empty"));
        }
        if self.block_start == self.variable_start
            || self.block_start == self.comment_start
            || self.variable_start == self.comment_start
        {
            return Err("block, variable and comment openers must be distinct".to_string());
        }
        Ok(())
    }
}

/// Language options passed through from the caller's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentOptions {
    /// Escape output values by default
    pub autoescape: bool,
    /// Fail at render time when an output value is undefined
    pub throw_on_undefined: bool,
    /// Drop the first newline after a block tag
    pub trim_blocks: bool,
    /// Strip leading spaces and tabs before a block tag
    pub lstrip_blocks: bool,
    /// Tag delimiters
    pub tags: TagSyntax,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            autoescape: true,
            throw_on_undefined: false,
            trim_blocks: false,
            lstrip_blocks: false,
            tags: TagSyntax::default(),
        }
    }
}

/// Fully assembled, immutable environment for one template.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    options: EnvironmentOptions,
    search_paths: Vec<PathBuf>,
    extensions: Vec<ExtensionDescriptor>,
    filters: Vec<FilterDescriptor>,
    globals: BTreeMap<String, serde_json::Value>,
    tag_owners: HashMap<String, usize>,
}

impl Environment {
    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    #[must_use]
    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    #[must_use]
    pub fn extensions(&self) -> &[ExtensionDescriptor] {
        &self.extensions
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterDescriptor] {
        &self.filters
    }

    #[must_use]
    pub fn globals(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.globals
    }

    /// The extension that registered `tag`, if any.
    #[must_use]
    pub fn extension_for_tag(&self, tag: &str) -> Option<&ExtensionDescriptor> {
        self.tag_owners.get(tag).map(|&i| &self.extensions[i])
    }

    /// The extension a call site refers to.
    #[must_use]
    pub fn resolve_extension(&self, site: &ExtensionRef) -> Option<&ExtensionDescriptor> {
        self.extensions.iter().find(|d| d.matches(site))
    }

    #[must_use]
    pub fn filter(&self, name: &str) -> Option<&FilterDescriptor> {
        self.filters.iter().find(|d| d.name == name)
    }

    /// Parse `source` with this environment's grammar.
    ///
    /// # Errors
    ///
    /// See [`super::parse`].
    pub fn parse(&self, name: &str, source: &str) -> Result<Template, ParseError> {
        super::parse(name, source, self)
    }
}

/// Builder for [`Environment`].
#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    options: EnvironmentOptions,
    search_paths: Vec<PathBuf>,
    extensions: Vec<ExtensionDescriptor>,
    filters: Vec<FilterDescriptor>,
    globals: BTreeMap<String, serde_json::Value>,
}

impl EnvironmentBuilder {
    #[must_use]
    pub fn options(mut self, options: EnvironmentOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn extension(mut self, descriptor: ExtensionDescriptor) -> Self {
        self.extensions.push(descriptor);
        self
    }

    #[must_use]
    pub fn extensions(mut self, descriptors: impl IntoIterator<Item = ExtensionDescriptor>) -> Self {
        self.extensions.extend(descriptors);
        self
    }

    #[must_use]
    pub fn filter(mut self, descriptor: FilterDescriptor) -> Self {
        self.filters.push(descriptor);
        self
    }

    #[must_use]
    pub fn filters(mut self, descriptors: impl IntoIterator<Item = FilterDescriptor>) -> Self {
        self.filters.extend(descriptors);
        self
    }

    #[must_use]
    pub fn global(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn globals(mut self, globals: BTreeMap<String, serde_json::Value>) -> Self {
        self.globals.extend(globals);
        self
    }

    /// Freeze the environment. The first extension to claim a tag owns it.
    #[must_use]
    pub fn build(self) -> Environment {
        let mut tag_owners = HashMap::new();
        for (i, descriptor) in self.extensions.iter().enumerate() {
            for tag in descriptor.instance.tags() {
                if let Some(&owner) = tag_owners.get(&tag) {
                    let owner: &ExtensionDescriptor = &self.extensions[owner];
                    tracing::warn!(
                        "Tag '{}' of extension '{}' is already registered by '{}'",
                        tag,
                        descriptor.name,
                        owner.name
                    );
                    continue;
                }
                tag_owners.insert(tag, i);
            }
        }

        Environment {
            options: self.options,
            search_paths: self.search_paths,
            extensions: self.extensions,
            filters: self.filters,
            globals: self.globals,
            tag_owners,
        }
    }
}
