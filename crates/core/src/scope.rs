//! Scoped release of transient resources.
//!
//! Downloaded voice notes, photos and synthesized speech are temp files that
//! must be deleted however a unit of work ends. A [`CleanupScope`] collects
//! release callbacks while the work proceeds and runs them in reverse order,
//! exactly once each, when the scope is closed or dropped (early return,
//! `?` propagation and panics included).
//!
//! A handle that never reaches a scope still releases its resource when it is
//! dropped, so a message discarded before dispatch does not leak its files.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A single release callback. Runs exactly once: on [`run`](Self::run), or
/// on drop if it was never run.
pub struct CleanupHandle {
    label: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CleanupHandle {
    /// Wrap an arbitrary release callback.
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    /// A handle that deletes `path`. A file that is already gone is not an error.
    pub fn remove_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self::new(label, move || match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the callback now, consuming the handle.
    pub fn run(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        debug!(resource = %self.label, "Releasing unadopted resource");
        if catch_unwind(AssertUnwindSafe(release)).is_err() {
            warn!(resource = %self.label, "Cleanup callback panicked");
        }
    }
}

impl std::fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A temp file together with the handle that deletes it.
#[derive(Debug)]
pub struct MediaFile {
    pub path: PathBuf,
    pub cleanup: Option<CleanupHandle>,
}

impl MediaFile {
    /// A temp file that should be deleted once the work is done.
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cleanup = Some(CleanupHandle::remove_file(path.clone()));
        Self { path, cleanup }
    }

    /// A file owned by someone else; nothing is released.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cleanup: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split into the path and the cleanup handle.
    pub fn into_parts(self) -> (PathBuf, Option<CleanupHandle>) {
        (self.path, self.cleanup)
    }
}

/// Accumulates release callbacks and runs them in reverse order on exit.
#[derive(Debug, Default)]
pub struct CleanupScope {
    handles: Vec<CleanupHandle>,
}

impl CleanupScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a scope pre-loaded with handles; `None` entries are skipped.
    pub fn with(handles: impl IntoIterator<Item = Option<CleanupHandle>>) -> Self {
        let mut scope = Self::new();
        for handle in handles {
            scope.defer(handle);
        }
        scope
    }

    /// Register a release callback. `None` is accepted and ignored.
    pub fn defer(&mut self, handle: Option<CleanupHandle>) {
        if let Some(handle) = handle {
            self.handles.push(handle);
        }
    }

    /// Take ownership of a media file's handle and return its path.
    pub fn adopt(&mut self, file: MediaFile) -> PathBuf {
        let (path, cleanup) = file.into_parts();
        self.defer(cleanup);
        path
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Run every pending callback now, newest first.
    pub fn close(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        while let Some(handle) = self.handles.pop() {
            let label = handle.label.clone();
            // A failing callback must not skip the ones registered before it.
            if catch_unwind(AssertUnwindSafe(|| handle.run())).is_err() {
                warn!(resource = %label, "Cleanup callback panicked");
            }
        }
    }
}

impl Drop for CleanupScope {
    fn drop(&mut self) {
        self.release_all();
    }
}
