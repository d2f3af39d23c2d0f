//! Scripted existence checks for resolver tests.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::resolver::PathProbe;

#[derive(Debug, Clone, Copy)]
enum Answer {
    Present(Duration),
    Missing(Duration),
    /// Never completes
    Hang,
}

/// A [`PathProbe`] answering from a per-path script.
///
/// Paths without a script are missing immediately. Every probed path is
/// recorded in call order and can be read back with [`ScriptedProbe::probed`].
///
/// ```rust
/// use std::time::Duration;
/// use tmpldeps::test_utils::ScriptedProbe;
///
/// let probe = ScriptedProbe::new()
///     .present("/templates/a.njk")
///     .present_after("/vendor/a.njk", Duration::from_millis(10))
///     .hang("/slow/a.njk");
/// assert!(probe.probed().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    answers: HashMap<PathBuf, Answer>,
    probed: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn present(self, path: impl Into<PathBuf>) -> Self {
        self.script(path, Answer::Present(Duration::ZERO))
    }

    #[must_use]
    pub fn present_after(self, path: impl Into<PathBuf>, delay: Duration) -> Self {
        self.script(path, Answer::Present(delay))
    }

    #[must_use]
    pub fn missing_after(self, path: impl Into<PathBuf>, delay: Duration) -> Self {
        self.script(path, Answer::Missing(delay))
    }

    #[must_use]
    pub fn hang(self, path: impl Into<PathBuf>) -> Self {
        self.script(path, Answer::Hang)
    }

    fn script(mut self, path: impl Into<PathBuf>, answer: Answer) -> Self {
        self.answers.insert(path.into(), answer);
        self
    }

    /// Paths probed so far.
    pub fn probed(&self) -> Vec<PathBuf> {
        self.probed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl PathProbe for ScriptedProbe {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        if let Ok(mut probed) = self.probed.lock() {
            probed.push(path.to_path_buf());
        }
        let answer = self.answers.get(path).copied().unwrap_or(Answer::Missing(Duration::ZERO));
        async move {
            match answer {
                Answer::Present(delay) | Answer::Missing(delay) if !delay.is_zero() => {
                    tokio::time::sleep(delay).await;
                }
                Answer::Hang => futures::future::pending::<()>().await,
                _ => {}
            }
            matches!(answer, Answer::Present(_))
        }
        .boxed()
    }
}
