//! Command templates rendered with minijinja.
//!
//! Undefined variables are errors, so a typo in a template fails the
//! instance instead of silently producing an empty argument.

use crate::core::{file_name, StreamValue};
use crate::errors::ExecutionError;
use crate::params::ParameterStore;
use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

/// Strict minijinja environment.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Creates an engine with strict undefined handling.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Renders `template` against a JSON context.
    ///
    /// # Errors
    ///
    /// `ExecutionError::Template` on syntax errors or undefined variables.
    pub fn render(&self, template: &str, context: &Json) -> Result<String, ExecutionError> {
        let tmpl = self.env.template_from_str(template).map_err(template_error)?;
        tmpl.render(Value::from_serialize(context))
            .map_err(template_error)
    }

    /// Returns true if `s` contains template syntax.
    #[must_use]
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

fn template_error(err: minijinja::Error) -> ExecutionError {
    ExecutionError::Template {
        message: err.to_string(),
    }
}

/// Renders a string that may only reference `params`.
///
/// # Errors
///
/// See [`TemplateEngine::render`].
pub fn render_params(template: &str, params: &ParameterStore) -> Result<String, ExecutionError> {
    if !TemplateEngine::is_template(template) {
        return Ok(template.to_string());
    }
    TemplateEngine::new().render(template, &TemplateContext::new(params).into_json())
}

/// Variables visible to a stage's command and output patterns.
///
/// | name | value |
/// |------|-------|
/// | `params` | the parameter store |
/// | `stage`, `key`, `prefix`, `tags` | instance identity |
/// | `task.cpus` | CPU hint |
/// | `inputs.<port>` | file names of the port, as a list |
/// | `input.<port>` | the same names joined with spaces |
/// | `by_key.<port>.<key>` | file names of one item in the port |
#[derive(Debug, Clone)]
pub struct TemplateContext {
    root: Map<String, Json>,
    inputs: Map<String, Json>,
    joined: Map<String, Json>,
    by_key: Map<String, Json>,
}

impl TemplateContext {
    /// A context holding only `params`.
    #[must_use]
    pub fn new(params: &ParameterStore) -> Self {
        let mut root = Map::new();
        root.insert("params".to_string(), params.to_json());
        Self {
            root,
            inputs: Map::new(),
            joined: Map::new(),
            by_key: Map::new(),
        }
    }

    /// Adds the instance identity.
    #[must_use]
    pub fn with_instance(
        mut self,
        stage: &str,
        key: &str,
        tags: &BTreeMap<String, String>,
        cpus: u32,
    ) -> Self {
        self.root.insert("stage".to_string(), json!(stage));
        self.root.insert("key".to_string(), json!(key));
        self.root.insert("prefix".to_string(), json!(key));
        self.root.insert("tags".to_string(), json!(tags));
        self.root.insert("task".to_string(), json!({ "cpus": cpus }));
        self
    }

    /// Binds an input port.
    #[must_use]
    pub fn with_input(mut self, port: &str, value: &StreamValue) -> Self {
        let names: Vec<String> = value
            .items()
            .iter()
            .flat_map(|item| item.files.iter().map(|f| file_name(f)))
            .collect();
        let per_key: Map<String, Json> = value
            .items()
            .iter()
            .map(|item| (item.key.clone(), json!(item.file_names())))
            .collect();

        self.joined.insert(port.to_string(), json!(names.join(" ")));
        self.inputs.insert(port.to_string(), json!(names));
        self.by_key.insert(port.to_string(), Json::Object(per_key));
        self
    }

    /// The finished context.
    #[must_use]
    pub fn into_json(mut self) -> Json {
        self.root.insert("inputs".to_string(), Json::Object(self.inputs));
        self.root.insert("input".to_string(), Json::Object(self.joined));
        self.root.insert("by_key".to_string(), Json::Object(self.by_key));
        Json::Object(self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Item;
    use crate::params::ParamValue;

    fn params() -> ParameterStore {
        ParameterStore::from_values([
            ("genome", ParamValue::String("hg38".to_string())),
            ("call_peaks", ParamValue::Bool(true)),
        ])
    }

    fn context() -> Json {
        let reads = Item::new("S1")
            .with_file("/data/S1_R1.fq")
            .with_file("/data/S1_R2.fq");
        let bams = vec![
            Item::new("S1").with_file("/w/S1.bam"),
            Item::new("S2").with_file("/w/S2.bam"),
        ];
        TemplateContext::new(&params())
            .with_instance("align", "S1", &BTreeMap::from([("control".to_string(), "C1".to_string())]), 4)
            .with_input("reads", &StreamValue::Item(reads))
            .with_input("bams", &StreamValue::List(bams))
            .into_json()
    }

    #[test]
    fn test_render_instance_variables() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "bwa -t {{ task.cpus }} {{ params.genome }} {{ input.reads }} > {{ prefix }}.sam",
                &context(),
            )
            .unwrap();
        assert_eq!(out, "bwa -t 4 hg38 S1_R1.fq S1_R2.fq > S1.sam");
    }

    #[test]
    fn test_render_lists_and_by_key() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "{% for b in inputs.bams %}-b {{ b }} {% endfor %}{{ by_key.bams.S2[0] }} {{ tags.control }}",
                &context(),
            )
            .unwrap();
        assert_eq!(out, "-b S1.bam -b S2.bam S2.bam C1");
    }

    #[test]
    fn test_undefined_is_an_error() {
        let err = TemplateEngine::new()
            .render("{{ params.missing }}", &context())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Template { .. }));
    }

    #[test]
    fn test_render_params() {
        assert_eq!(render_params("/data/{{ params.genome }}", &params()).unwrap(), "/data/hg38");
        assert_eq!(render_params("plain", &params()).unwrap(), "plain");
    }
}
