//! Best-effort publication of outputs to the persistent root.

use super::sanitize_key;
use crate::config::PublishMode;
use crate::core::file_name;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A file that could not be published. The instance still succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishFailure {
    /// Stage name.
    pub stage: String,
    /// Instance key.
    pub key: String,
    /// The output in the working directory.
    pub file: PathBuf,
    /// Where it should have gone.
    pub target: PathBuf,
    /// The IO error or the collision.
    pub message: String,
}

/// Publish targets written during one run, with the instance key that owns
/// each. A target is written at most once per run.
#[derive(Debug, Default)]
pub struct PublishLedger {
    claimed: Mutex<HashMap<PathBuf, String>>,
}

impl PublishLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `target` for `key`, returning the current owner if taken.
    fn claim(&self, target: &Path, key: &str) -> Result<(), String> {
        let mut claimed = self.claimed.lock();
        match claimed.get(target) {
            Some(owner) => Err(owner.clone()),
            None => {
                claimed.insert(target.to_path_buf(), key.to_string());
                Ok(())
            }
        }
    }

    /// Number of claimed targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    /// True when nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Directory receiving a stage instance's published files.
#[must_use]
pub fn publish_dir(root: &Path, mode: PublishMode, stage: &str, key: &str) -> PathBuf {
    match mode {
        PublishMode::Flat => root.join(stage),
        PublishMode::ByKey => root.join(stage).join(sanitize_key(key)),
    }
}

/// Copies `files` below the publish root.
///
/// Each file is written to a uniquely named hidden `.partial` sibling first
/// and renamed into place, so readers never observe a half-written output.
/// A target already claimed in `ledger` by another instance is left alone
/// and reported as a failure.
pub async fn publish(
    ledger: &PublishLedger,
    root: &Path,
    mode: PublishMode,
    stage: &str,
    key: &str,
    files: &[PathBuf],
) -> Vec<PublishFailure> {
    let dir = publish_dir(root, mode, stage, key);
    let mut failures = Vec::new();

    for file in files {
        let target = dir.join(file_name(file));
        let result = match ledger.claim(&target, key) {
            Ok(()) => copy_into_place(file, &target)
                .await
                .map_err(|err| err.to_string()),
            Err(owner) => Err(format!("already published by instance '{owner}'")),
        };
        match result {
            Ok(()) => debug!(stage, key, target = %target.display(), "Published output"),
            Err(message) => {
                warn!(stage, key, file = %file.display(), error = %message, "Publish failed");
                failures.push(PublishFailure {
                    stage: stage.to_string(),
                    key: key.to_string(),
                    file: file.clone(),
                    target,
                    message,
                });
            }
        }
    }

    failures
}

async fn copy_into_place(src: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = target.with_file_name(format!(
        ".{}.{}.partial",
        file_name(target),
        Uuid::new_v4().simple()
    ));
    if let Err(err) = tokio::fs::copy(src, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }
    tokio::fs::rename(&partial, target).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_flat_and_by_key() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let bam = work.path().join("S1.bam");
        std::fs::write(&bam, b"alignment").unwrap();
        let ledger = PublishLedger::new();

        let failures =
            publish(&ledger, root.path(), PublishMode::Flat, "align", "S1", &[bam.clone()]).await;
        assert!(failures.is_empty());
        assert_eq!(std::fs::read(root.path().join("align/S1.bam")).unwrap(), b"alignment");

        let failures = publish(&ledger, root.path(), PublishMode::ByKey, "align", "S1", &[bam]).await;
        assert!(failures.is_empty());
        assert!(root.path().join("align/S1/S1.bam").is_file());
        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("align/S1"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("S1.bam")]);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone.txt");

        let failures = publish(
            &PublishLedger::new(),
            root.path(),
            PublishMode::Flat,
            "qc",
            "S1",
            &[missing.clone()],
        )
        .await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, missing);
        assert_eq!(failures[0].target, root.path().join("qc/gone.txt"));
    }

    #[tokio::test]
    async fn test_same_name_from_two_keys_keeps_first() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let ledger = PublishLedger::new();
        let mut failures = Vec::new();
        for key in ["S1", "S2"] {
            let dir = work.path().join(key);
            std::fs::create_dir(&dir).unwrap();
            let stats = dir.join("stats.txt");
            std::fs::write(&stats, key).unwrap();
            failures.extend(publish(&ledger, root.path(), PublishMode::Flat, "qc", key, &[stats]).await);
        }

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "S2");
        assert_eq!(failures[0].target, root.path().join("qc/stats.txt"));
        assert!(failures[0].message.contains("'S1'"));
        assert_eq!(std::fs::read_to_string(root.path().join("qc/stats.txt")).unwrap(), "S1");
    }
}
