//! LIFO cleanup registry for run-scoped resources.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

struct CleanupCallback {
    callback: Box<dyn Fn() + Send + Sync>,
    name: Option<String>,
}

/// Cleanup callbacks executed in reverse registration order.
///
/// The executor registers scratch directories here and either runs the
/// registry (successful run, work not retained) or clears it.
#[derive(Default)]
pub struct CleanupRegistry {
    callbacks: RwLock<Vec<CleanupCallback>>,
}

impl CleanupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback.
    pub fn register<F>(&self, callback: F, name: Option<&str>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.write().push(CleanupCallback {
            callback: Box::new(callback),
            name: name.map(String::from),
        });
    }

    /// Registers removal of a directory tree, named after its path.
    pub fn register_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        let name = dir.display().to_string();
        self.register(
            move || match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(dir = %dir.display(), "Removed work directory"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(dir = %dir.display(), error = %err, "Could not remove work directory"),
            },
            Some(&name),
        );
    }

    /// Runs all callbacks in LIFO order and empties the registry.
    ///
    /// Each callback gets an equal share of `timeout_secs`. Panics and
    /// timeouts are collected as `(name, message)` and do not stop the rest.
    pub async fn run_all(&self, timeout_secs: f64) -> Vec<(String, String)> {
        let callbacks = std::mem::take(&mut *self.callbacks.write());
        if callbacks.is_empty() {
            return Vec::new();
        }

        #[allow(clippy::cast_precision_loss)]
        let share = (timeout_secs / callbacks.len() as f64).max(0.01);
        let mut failures = Vec::new();

        for entry in callbacks.into_iter().rev() {
            let name = entry.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
            let result = tokio::time::timeout(
                Duration::from_secs_f64(share),
                tokio::task::spawn_blocking(move || {
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (entry.callback)()))
                }),
            )
            .await;

            let failure = match result {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(panic))) => Some(format!("Cleanup callback panicked: {panic:?}")),
                Ok(Err(join_err)) => Some(format!("Cleanup task join error: {join_err}")),
                Err(_) => Some("Cleanup callback timed out".to_string()),
            };
            if let Some(message) = failure {
                warn!(cleanup = %name, "{message}");
                failures.push((name, message));
            }
        }

        failures
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Drops all callbacks without running them.
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lifo_order() {
        let registry = CleanupRegistry::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        for n in 1..=3 {
            let order = order.clone();
            registry.register(move || order.write().push(n), None);
        }
        registry.run_all(5.0).await;

        assert_eq!(*order.read(), vec![3, 2, 1]);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_panic_does_not_stop_others() {
        let registry = CleanupRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = counter.clone();
        registry.register(move || { first.fetch_add(1, Ordering::SeqCst); }, Some("first"));
        registry.register(|| panic!("boom"), Some("panics"));
        let third = counter.clone();
        registry.register(move || { third.fetch_add(1, Ordering::SeqCst); }, Some("third"));

        let failures = registry.run_all(5.0).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "panics");
    }

    #[tokio::test]
    async fn test_register_dir_removes_tree() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run").join("align").join("S1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("S1.bam"), b"bam").unwrap();

        let registry = CleanupRegistry::new();
        registry.register_dir(root.path().join("run"));
        assert!(registry.run_all(5.0).await.is_empty());
        assert!(!root.path().join("run").exists());
    }

    #[test]
    fn test_clear() {
        let registry = CleanupRegistry::new();
        registry.register(|| {}, Some("keep"));
        registry.register_dir("/nonexistent/run");
        assert_eq!(registry.pending_count(), 2);

        registry.clear();
        assert_eq!(registry.pending_count(), 0);
    }
}
