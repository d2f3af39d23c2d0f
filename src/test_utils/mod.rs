//! Test utilities for tmpldeps
//!
//! Helpers shared by the unit and integration tests:
//! - [`init_test_logging`] for opt-in tracing output
//! - [`TemplateTree`], an on-disk template and asset layout in a temp directory
//! - [`ScriptedProbe`], a [`PathProbe`](crate::resolver::PathProbe) whose
//!   answers and timings are set per path
//!
//! # Example
//!
//! ```rust,no_run
//! use tmpldeps::test_utils::TemplateTree;
//!
//! # fn example() -> anyhow::Result<()> {
//! let tree = TemplateTree::new()?;
//! tree.write("templates/base.njk", "<html>{% block body %}{% endblock %}</html>")?;
//! assert!(tree.path().join("templates/base.njk").exists());
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod probe;

pub use fixtures::TemplateTree;
pub use probe::ScriptedProbe;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. `level` takes precedence over
/// `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=tmpldeps=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
