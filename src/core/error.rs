//! Error handling for tmpldeps
//!
//! This module provides the error type returned by every library operation and
//! the user-facing wrapper used by the command-line harness. The error system
//! is built around two ideas:
//! 1. **Strongly-typed errors** so callers (usually a bundler integration) can
//!    match on the failure kind
//! 2. **User-friendly messages** with details and suggestions for terminal output
//!
//! # Error Categories
//!
//! - **Grammar**: [`LoaderError::Parse`] - the template source is malformed
//! - **Resolution**: [`LoaderError::NotFound`] - a template or asset is missing
//!   from every search directory
//! - **Assets**: [`LoaderError::UnsupportedExpression`] - an asset path uses a
//!   construct beyond literal/variable concatenation
//! - **Addons**: [`LoaderError::AddonLoad`] - an extension or filter module
//!   could not be loaded
//! - **Compilation**: [`LoaderError::Compile`] - the precompiler rejected the tree
//! - **Configuration**: [`LoaderError::Config`] and [`LoaderError::Io`]
//!
//! Every error is fatal for the build step that raised it. There is no retry
//! path and no partial manifest.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tmpldeps::core::{LoaderError, ReferenceKind, user_friendly_error};
//!
//! let error = LoaderError::NotFound {
//!     kind: ReferenceKind::Template,
//!     name: "partials/header.njk".to_string(),
//!     searched: vec![],
//! };
//!
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display(); // Shows colored error with suggestions
//! ```

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::template::ParseError;

/// Which kind of reference failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ReferenceKind {
    /// A sub-template named by `extends`, `include`, `import` or `from`
    Template,
    /// A static asset named by the `static` function
    Asset,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template => f.write_str("Template"),
            Self::Asset => f.write_str("Asset"),
        }
    }
}

/// Which kind of addon failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum AddonKind {
    /// A custom tag extension
    Extension,
    /// A value filter
    Filter,
}

impl fmt::Display for AddonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extension => f.write_str("extension"),
            Self::Filter => f.write_str("filter"),
        }
    }
}

/// The main error type for tmpldeps operations
///
/// # Design Philosophy
///
/// - **Specific Error Types**: each variant is one failure mode of the pipeline
/// - **Rich Context**: template identifiers, logical names and locations are kept
/// - **User-Friendly**: messages are written for someone reading build output
///
/// # Examples
///
/// ```rust,no_run
/// use tmpldeps::core::{LoaderError, ReferenceKind};
///
/// fn explain(error: &LoaderError) {
///     match error {
///         LoaderError::NotFound { kind: ReferenceKind::Asset, name, .. } => {
///             eprintln!("add the directory containing {name} to assets_paths");
///         }
///         LoaderError::Parse { template, line, .. } => {
///             eprintln!("fix the syntax of {template} near line {line:?}");
///         }
///         other => eprintln!("{other}"),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Template source violates the grammar
    ///
    /// # Fields
    /// - `template`: identifier of the template being parsed
    /// - `message`: what the parser expected or found
    /// - `line`/`col`: 1-based location when known
    #[error("Failed to parse template '{template}'{}: {message}", format_location(.line, .col))]
    Parse {
        /// Identifier of the template being parsed
        template: String,
        /// Description of the grammar violation
        message: String,
        /// 1-based line of the offending token
        line: Option<usize>,
        /// 1-based column of the offending token
        col: Option<usize>,
    },

    /// A referenced template or asset exists in none of the search directories
    #[error("{kind} '{name}' not found in any search path")]
    NotFound {
        /// Whether the reference is a template or an asset
        kind: ReferenceKind,
        /// The logical name as written in the template
        name: String,
        /// Every candidate path that was probed, in priority order
        searched: Vec<PathBuf>,
    },

    /// An asset path expression used something other than literals,
    /// variables and `+`
    #[error(
        "Unsupported expression in asset path of '{template}' at line {line}, column {col}: {node} is not a literal, variable or concatenation"
    )]
    UnsupportedExpression {
        /// Identifier of the template containing the expression
        template: String,
        /// Kind of the node that was rejected (e.g. "member lookup")
        node: String,
        /// 1-based line of the rejected node
        line: usize,
        /// 1-based column of the rejected node
        col: usize,
    },

    /// An extension or filter module failed to load
    #[error("Failed to load {kind} '{name}' from '{module_path}': {reason}")]
    AddonLoad {
        /// Extension or filter
        kind: AddonKind,
        /// Declared name of the addon
        name: String,
        /// Module path the addon was declared with
        module_path: String,
        /// Why loading failed
        reason: String,
    },

    /// The precompiler rejected the template
    #[error("Failed to compile template '{template}': {reason}")]
    Compile {
        /// Identifier of the template being compiled
        template: String,
        /// Why compilation failed
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_location(line: &Option<usize>, col: &Option<usize>) -> String {
    match (*line, *col) {
        (Some(line), Some(col)) => format!(" at line {line}, column {col}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

impl From<ParseError> for LoaderError {
    fn from(error: ParseError) -> Self {
        Self::Parse {
            template: error.template,
            message: error.message,
            line: error.line,
            col: error.col,
        }
    }
}

impl LoaderError {
    /// Short machine-friendly name of the error kind.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::NotFound { .. } => "NotFoundError",
            Self::UnsupportedExpression { .. } => "UnsupportedExpressionError",
            Self::AddonLoad { .. } => "AddonLoadError",
            Self::Compile { .. } => "CompileError",
            Self::Config { .. } => "ConfigError",
            Self::Io(_) => "IoError",
        }
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// `ErrorContext` wraps a [`LoaderError`] with an optional suggestion and
/// details, displayed with color coding in the terminal.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error, or `None` when only a message is known
    pub error: Option<LoaderError>,
    /// Message used when there is no typed error
    pub message: String,
    /// Optional suggestion for resolving the issue
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from a [`LoaderError`]
    #[must_use]
    pub fn new(error: LoaderError) -> Self {
        Self {
            message: error.to_string(),
            error: Some(error),
            suggestion: None,
            details: None,
        }
    }

    /// Create an error context from a plain message
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            error: None,
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    ///
    /// - Error message: Red and bold
    /// - Details: Yellow
    /// - Suggestion: Green
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions
///
/// Recognizes [`LoaderError`] anywhere in the `anyhow` chain and
/// [`std::io::Error`]; anything else is shown with its full context chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(loader_error) =
        error.chain().find_map(|cause| cause.downcast_ref::<LoaderError>())
    {
        return create_error_context(loader_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        return match io_error.kind() {
            std::io::ErrorKind::NotFound => ErrorContext::message(format!("{error:#}"))
                .with_suggestion("Check that the file or directory exists and the path is correct"),
            std::io::ErrorKind::PermissionDenied => ErrorContext::message(format!("{error:#}"))
                .with_suggestion("Check file ownership and permissions"),
            _ => ErrorContext::message(format!("{error:#}")),
        };
    }

    ErrorContext::message(format!("{error:#}"))
}

fn create_error_context(error: &LoaderError) -> ErrorContext {
    let base = ErrorContext::message(error.to_string());
    match error {
        LoaderError::Parse { .. } => base
            .with_details("The template could not be parsed, so none of its dependencies were resolved")
            .with_suggestion("Check tag delimiters, unclosed blocks and custom tags registered as extensions"),
        LoaderError::NotFound { kind, searched, .. } => {
            let searched =
                searched.iter().map(|p| format!("  {}", p.display())).collect::<Vec<_>>();
            let option = match kind {
                ReferenceKind::Template => "search_paths",
                ReferenceKind::Asset => "assets_paths",
            };
            let ctx = base.with_suggestion(format!(
                "Add the directory containing it to `{option}`, or fix the reference"
            ));
            if searched.is_empty() {
                ctx.with_details(format!("`{option}` is empty"))
            } else {
                ctx.with_details(format!("Searched:\n{}", searched.join("\n")))
            }
        }
        LoaderError::UnsupportedExpression { .. } => base.with_suggestion(
            "Build dynamic asset paths only from string literals and plain variables joined with `+`",
        ),
        LoaderError::AddonLoad { kind, .. } => base
            .with_details(format!("Every declared {kind} is loaded before parsing"))
            .with_suggestion("Check the module path in the configuration"),
        LoaderError::Compile { .. } => {
            base.with_suggestion("Declare every filter and extension the template uses")
        }
        LoaderError::Config { .. } => {
            base.with_suggestion("Check the syntax of the tmpldeps.toml configuration file")
        }
        LoaderError::Io(_) => base,
    }
}
