//! Engine configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// How input files are placed into an instance's working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialize {
    /// Symbolic link to the canonical source path (copy on non-unix).
    #[default]
    Link,
    /// Full copy.
    Copy,
}

/// Layout below `<publish_dir>/<stage>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Files land directly in the stage directory.
    #[default]
    Flat,
    /// One subdirectory per instance key.
    ByKey,
}

/// Settings for one executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for per-instance scratch directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Root for published outputs.
    #[serde(default = "default_publish_dir")]
    pub publish_dir: PathBuf,
    /// Upper bound on concurrently running instances; at least one.
    #[serde(
        default = "default_max_workers",
        deserialize_with = "deserialize_max_workers"
    )]
    pub max_workers: usize,
    /// Interpreter for `.command.sh`.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Lines of stderr kept in a `NonZeroExit` failure.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
    /// Link or copy inputs.
    #[serde(default)]
    pub materialize: Materialize,
    /// Keep scratch directories after a successful run.
    #[serde(default = "default_true")]
    pub retain_work: bool,
    /// Flat or per-key publish layout.
    #[serde(default)]
    pub publish_mode: PublishMode,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn deserialize_max_workers<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match usize::deserialize(deserializer)? {
        0 => Err(serde::de::Error::custom("max_workers must be at least 1")),
        n => Ok(n),
    }
}

fn default_shell() -> String {
    "bash".to_string()
}

const fn default_stderr_tail_lines() -> usize {
    20
}

const fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            publish_dir: default_publish_dir(),
            max_workers: default_max_workers(),
            shell: default_shell(),
            stderr_tail_lines: default_stderr_tail_lines(),
            materialize: Materialize::default(),
            retain_work: true,
            publish_mode: PublishMode::default(),
        }
    }
}

impl EngineConfig {
    /// Default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scratch root.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Sets the publish root.
    #[must_use]
    pub fn with_publish_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.publish_dir = dir.into();
        self
    }

    /// Sets the worker count; zero is treated as one.
    #[must_use]
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    /// Sets the interpreter.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the stderr tail length.
    #[must_use]
    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    /// Sets the materialization strategy.
    #[must_use]
    pub fn with_materialize(mut self, materialize: Materialize) -> Self {
        self.materialize = materialize;
        self
    }

    /// Keeps or reclaims scratch directories of successful runs.
    #[must_use]
    pub fn with_retain_work(mut self, retain: bool) -> Self {
        self.retain_work = retain;
        self
    }

    /// Sets the publish layout.
    #[must_use]
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }
}
