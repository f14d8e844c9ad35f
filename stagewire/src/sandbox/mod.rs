//! Per-instance execution sandbox.
//!
//! Every stage instance gets its own working directory. Inputs are linked
//! (or copied) in under their base names, the command template is rendered
//! to `.command.sh` and run, and the declared output patterns are matched
//! against what the command left behind. Published outputs are then copied
//! to `<publish_dir>/<stage>/`.

mod process;
mod publish;
mod template;

pub use process::{run_script, stderr_tail};
pub use publish::{publish, publish_dir, PublishFailure, PublishLedger};
pub use template::{render_params, TemplateContext, TemplateEngine};

use crate::cancellation::CancellationToken;
use crate::config::{EngineConfig, Materialize};
use crate::core::{file_name, StreamValue};
use crate::errors::ExecutionError;
use crate::glob::Pattern;
use crate::params::ParameterStore;
use crate::stages::StageDef;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Rendered command file.
pub const SCRIPT_FILE: &str = ".command.sh";
/// Captured standard output.
pub const STDOUT_FILE: &str = ".command.out";
/// Captured standard error.
pub const STDERR_FILE: &str = ".command.err";

/// Everything needed to run one stage instance.
#[derive(Debug, Clone)]
pub struct Instance {
    /// The stage template.
    pub stage: Arc<StageDef>,
    /// Instance key, used as the file prefix.
    pub key: String,
    /// Tags carried from the driving item.
    pub tags: BTreeMap<String, String>,
    /// Bound input values by port name, in port order.
    pub inputs: Vec<(String, StreamValue)>,
    /// The command template chosen for this run.
    pub command: String,
    /// Scratch directory; created by the sandbox.
    pub work_dir: PathBuf,
}

/// Result of a successful instance.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    /// Scratch directory the instance ran in.
    pub work_dir: PathBuf,
    /// Matched files per output port, in port order.
    pub outputs: Vec<(String, Vec<PathBuf>)>,
    /// Outputs that could not be published.
    pub publish_failures: Vec<PublishFailure>,
}

/// Runs instances; shared by all workers of one executor.
#[derive(Debug)]
pub struct Sandbox {
    config: Arc<EngineConfig>,
    params: Arc<ParameterStore>,
    templates: TemplateEngine,
    published: PublishLedger,
}

impl Sandbox {
    /// Creates a sandbox.
    #[must_use]
    pub fn new(config: Arc<EngineConfig>, params: Arc<ParameterStore>) -> Self {
        Self {
            config,
            params,
            templates: TemplateEngine::new(),
            published: PublishLedger::new(),
        }
    }

    /// Runs one instance to completion.
    ///
    /// # Errors
    ///
    /// Any [`ExecutionError`]; publication problems are reported in the
    /// outcome instead.
    pub async fn run(
        &self,
        instance: &Instance,
        token: &CancellationToken,
    ) -> Result<SandboxOutcome, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                reason: token.reason().unwrap_or_default(),
            });
        }

        let stage = &instance.stage;
        let dir = &instance.work_dir;
        tokio::fs::create_dir_all(dir).await?;

        let input_names = self.materialize(instance).await?;

        let mut context = TemplateContext::new(&self.params).with_instance(
            &stage.name,
            &instance.key,
            &instance.tags,
            stage.cpus,
        );
        for (port, value) in &instance.inputs {
            context = context.with_input(port, value);
        }
        let context = context.into_json();

        let script = self.templates.render(&instance.command, &context)?;
        tokio::fs::write(dir.join(SCRIPT_FILE), &script).await?;
        debug!(stage = %stage.name, key = %instance.key, "Rendered command");

        run_script(
            &self.config.shell,
            dir,
            stage.timeout(),
            self.config.stderr_tail_lines,
            token,
        )
        .await?;

        let mut outputs = Vec::with_capacity(stage.outputs.len());
        let mut publish_failures = Vec::new();
        for port in &stage.outputs {
            let pattern = if TemplateEngine::is_template(&port.pattern) {
                self.templates.render(&port.pattern, &context)?
            } else {
                port.pattern.clone()
            };
            let files = match_outputs(dir, &Pattern::new(&pattern), &input_names).await?;
            if port.required && files.is_empty() {
                return Err(ExecutionError::MissingOutput {
                    port: port.name.clone(),
                    pattern,
                });
            }

            if port.publish && !files.is_empty() {
                publish_failures.extend(
                    publish(
                        &self.published,
                        &self.config.publish_dir,
                        self.config.publish_mode,
                        &stage.name,
                        &instance.key,
                        &files,
                    )
                    .await,
                );
            }
            outputs.push((port.name.clone(), files));
        }

        info!(
            stage = %stage.name,
            key = %instance.key,
            outputs = outputs.iter().map(|(_, f)| f.len()).sum::<usize>(),
            "Instance finished"
        );
        Ok(SandboxOutcome {
            work_dir: dir.clone(),
            outputs,
            publish_failures,
        })
    }

    async fn materialize(&self, instance: &Instance) -> Result<HashSet<String>, ExecutionError> {
        let mut names = HashSet::new();
        for (_, value) in &instance.inputs {
            for file in value.items().iter().flat_map(|item| &item.files) {
                let name = file_name(file);
                if !names.insert(name.clone()) {
                    return Err(materialize_error(
                        file,
                        format!("another input is already named '{name}'"),
                    ));
                }

                let source = tokio::fs::canonicalize(file)
                    .await
                    .map_err(|err| materialize_error(file, err.to_string()))?;
                let target = instance.work_dir.join(&name);
                place(&source, &target, self.config.materialize)
                    .await
                    .map_err(|err| materialize_error(file, err.to_string()))?;
            }
        }
        Ok(names)
    }
}

#[cfg(unix)]
async fn place(source: &Path, target: &Path, how: Materialize) -> std::io::Result<()> {
    match how {
        Materialize::Link => tokio::fs::symlink(source, target).await,
        Materialize::Copy => tokio::fs::copy(source, target).await.map(|_| ()),
    }
}

#[cfg(not(unix))]
async fn place(source: &Path, target: &Path, _how: Materialize) -> std::io::Result<()> {
    tokio::fs::copy(source, target).await.map(|_| ())
}

fn materialize_error(file: &Path, message: String) -> ExecutionError {
    ExecutionError::Materialize {
        file: file.display().to_string(),
        message,
    }
}

/// Top-level entries of `dir` matching `pattern`, sorted by name.
///
/// Command bookkeeping files and the names in `exclude` (the materialized
/// inputs) never match. The result depends only on the directory listing.
///
/// # Errors
///
/// IO errors from reading the directory.
pub async fn match_outputs(
    dir: &Path,
    pattern: &Pattern,
    exclude: &HashSet<String>,
) -> std::io::Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(".command") || exclude.contains(&name) {
            continue;
        }
        let matched = pattern
            .try_captures(&name)
            .map_err(std::io::Error::other)?
            .is_some();
        if matched {
            names.push(name);
        }
    }
    names.sort();
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// Makes an instance key safe to use as a single path component.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
