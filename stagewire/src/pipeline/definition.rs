//! Declarative pipeline files.
//!
//! A [`PipelineDefinition`] is the JSON form of a graph: the parameter
//! schema, the seeds with the source each one is filled from, the
//! combinators and the stage templates. Seed sources are resolved against
//! the parameter store before the graph is built, so a seed directory may be
//! written as `"{{ params.reads }}"`.

use super::{Graph, GraphBuilder};
use crate::core::{file_name, Item, Shape};
use crate::errors::{ContractErrorInfo, StagewireError, ValidationError};
use crate::params::{ParamSchema, ParameterStore};
use crate::sandbox::render_params;
use crate::stages::StageDef;
use crate::stream::{discover, read_records, Combinator, Flavor, RecordLayout, Seed};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a seed's items come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum SeedSource {
    /// Files in a directory matching a glob.
    Discover {
        /// Directory; may be a parameter template.
        dir: String,
        /// File name pattern.
        pattern: String,
    },
    /// A comma-separated record file.
    Records {
        /// Record file; may be a parameter template.
        path: String,
        /// Column layout.
        layout: RecordLayout,
    },
    /// Items written inline.
    Items {
        /// The items.
        items: Vec<Item>,
    },
    /// One file named by a path option; empty when the option is blank or unset.
    Param {
        /// Option name.
        param: String,
    },
}

/// A seed declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedDef {
    /// Node name.
    pub name: String,
    /// Item kind.
    pub kind: String,
    /// Multi or broadcast.
    #[serde(default)]
    pub flavor: Flavor,
    /// Item or list, for broadcast seeds.
    #[serde(default)]
    pub shape: Shape,
    /// Fail at startup when the source yields nothing.
    #[serde(default)]
    pub required: bool,
    /// Item source.
    #[serde(flatten)]
    pub source: SeedSource,
}

/// A pipeline as written in a definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Declared options.
    #[serde(default)]
    pub params: ParamSchema,
    /// External streams.
    #[serde(default)]
    pub seeds: Vec<SeedDef>,
    /// Stream combinators.
    #[serde(default)]
    pub combinators: Vec<Combinator>,
    /// Stage templates.
    #[serde(default)]
    pub stages: Vec<StageDef>,
    /// Directory relative seed paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl PipelineDefinition {
    /// Parses a definition from JSON text.
    ///
    /// # Errors
    ///
    /// `Serialization` for malformed JSON or unknown shapes.
    pub fn from_json(text: &str) -> Result<Self, StagewireError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a definition file; relative seed paths resolve against its directory.
    ///
    /// # Errors
    ///
    /// `Io` if the file can't be read, otherwise see [`PipelineDefinition::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StagewireError> {
        let path = path.as_ref();
        let mut definition = Self::from_json(&std::fs::read_to_string(path)?)?;
        definition.base_dir = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), pipeline = %definition.name, "Loaded pipeline definition");
        Ok(definition)
    }

    /// The declared option surface.
    #[must_use]
    pub fn schema(&self) -> &ParamSchema {
        &self.params
    }

    /// Resolves pipeline options given as command-line arguments.
    ///
    /// # Errors
    ///
    /// See [`crate::params::cli::parse_args`].
    pub fn resolve_args<I, T>(&self, args: I) -> Result<ParameterStore, StagewireError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        crate::params::cli::parse_args(&self.params, args)
    }

    /// Fills the seeds and builds the validated graph.
    ///
    /// # Errors
    ///
    /// Seed resolution errors, then anything [`GraphBuilder::build`] reports.
    pub fn build(&self, params: impl Into<Arc<ParameterStore>>) -> Result<Graph, StagewireError> {
        let params = params.into();
        let mut builder = GraphBuilder::new(&self.name);
        for seed in &self.seeds {
            builder = builder.seed(self.fill_seed(seed, &params)?);
        }
        for combinator in &self.combinators {
            builder = builder.combinator(combinator.clone());
        }
        for stage in &self.stages {
            builder = builder.stage(stage.clone());
        }
        info!(pipeline = %self.name, nodes = builder.node_count(), "Building pipeline definition");
        builder.build(params)
    }

    fn fill_seed(&self, def: &SeedDef, params: &ParameterStore) -> Result<Seed, StagewireError> {
        let items = match &def.source {
            SeedSource::Discover { dir, pattern } => {
                discover(&self.seed_path(def, dir, params)?, pattern)?
            }
            SeedSource::Records { path, layout } => {
                read_records(&self.seed_path(def, path, params)?, layout)?
            }
            SeedSource::Items { items } => items.clone(),
            SeedSource::Param { param } => match params.get(param) {
                Some(value) if !value.is_blank() => {
                    let path = match (value.as_path(), value.as_str()) {
                        (Some(path), _) => path.to_path_buf(),
                        (None, Some(text)) => self.seed_path(def, text, params)?,
                        (None, None) => return Err(param_seed_error(def, param).into()),
                    };
                    vec![Item::new(file_name(&path)).with_file(path)]
                }
                _ => Vec::new(),
            },
        };
        debug!(seed = %def.name, items = items.len(), "Filled seed");

        Ok(Seed {
            name: def.name.clone(),
            kind: def.kind.clone(),
            flavor: def.flavor,
            shape: def.shape,
            required: def.required,
            items,
        })
    }

    fn seed_path(
        &self,
        def: &SeedDef,
        template: &str,
        params: &ParameterStore,
    ) -> Result<PathBuf, StagewireError> {
        let rendered = render_params(template, params).map_err(|err| {
            let message = format!("Seed '{}': {err}", def.name);
            ValidationError::new(message.clone())
                .with_subjects(vec![def.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new("SEED-SOURCE", message)
                        .with_fix_hint("Seed paths may only reference declared options."),
                )
        })?;
        let path = PathBuf::from(rendered);
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }
}

fn param_seed_error(def: &SeedDef, param: &str) -> ValidationError {
    let message = format!("Seed '{}': option '{param}' does not hold a path", def.name);
    ValidationError::new(message.clone())
        .with_subjects(vec![def.name.clone()])
        .with_error_info(ContractErrorInfo::new("SEED-SOURCE", message))
}
