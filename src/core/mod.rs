//! Core types for tmpldeps
//!
//! This module holds the error type shared by every stage of the pipeline and
//! the user-facing error context used by the command-line harness.
//!
//! # Error Management
//!
//! - **Strongly-typed errors** ([`LoaderError`]) for precise error handling in code
//! - **User-friendly contexts** ([`ErrorContext`]) with details and suggestions
//! - [`user_friendly_error`] converts any `anyhow::Error` for display
//!
//! ```rust
//! use tmpldeps::core::{LoaderError, user_friendly_error};
//!
//! fn example_operation() -> anyhow::Result<String> {
//!     Err(LoaderError::Config { message: "search_paths must be a list".into() }.into())
//! }
//!
//! if let Err(e) = example_operation() {
//!     let friendly = user_friendly_error(e);
//!     assert!(friendly.to_string().contains("search_paths"));
//! }
//! ```

pub mod error;

pub use error::{AddonKind, ErrorContext, LoaderError, ReferenceKind, user_friendly_error};
