//! Integration test suite for tmpldeps
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **pipeline**: End-to-end processing against templates on disk
//! - **resolution**: Search path priority and missing references
//! - **addons**: Extensions and filters loaded from descriptor files
//! - **cli**: The `tmpldeps process` binary

#[path = "../common/mod.rs"]
mod common;

mod addons;
mod cli;
mod pipeline;
mod resolution;
