//! Command-line surface generated from a [`ParamSchema`].
//!
//! Pipeline options are only known once the definition is loaded, so the
//! `clap::Command` is assembled at run time: one `--name` argument per
//! declared option. Anything clap doesn't recognise is a startup error.

use super::{ParamKind, ParamSchema, ParameterStore};
use crate::errors::{ContractErrorInfo, StagewireError, ValidationError};
use clap::{Arg, ArgAction, Command};

/// Builds the `clap` command for the schema's options.
#[must_use]
pub fn command(schema: &ParamSchema, bin_name: &str) -> Command {
    let mut cmd = Command::new(bin_name.to_string())
        .no_binary_name(true)
        .disable_help_subcommand(true);

    for spec in &schema.params {
        let mut arg = Arg::new(spec.name.clone())
            .long(spec.name.clone())
            .action(ArgAction::Set)
            .value_name(spec.kind.to_string().to_uppercase());

        if spec.kind == ParamKind::Bool {
            arg = arg
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true");
        }

        let mut help = spec.help.clone().unwrap_or_default();
        if let Some(default) = &spec.default {
            if !help.is_empty() {
                help.push(' ');
            }
            help.push_str(&format!("[default: {default}]"));
        }
        if !help.is_empty() {
            arg = arg.help(help);
        }

        cmd = cmd.arg(arg);
    }

    cmd
}

/// Parses pipeline option arguments and resolves the parameter store.
///
/// # Errors
///
/// `ValidationError` for unknown options or malformed values, plus any
/// error from [`ParamSchema::resolve_raw`].
pub fn parse_args<I, T>(schema: &ParamSchema, args: I) -> Result<ParameterStore, StagewireError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command(schema, "params").try_get_matches_from(args).map_err(|e| {
        ValidationError::new(e.to_string().trim().to_string()).with_error_info(
            ContractErrorInfo::new("PARAM-UNKNOWN-OPTION", "Rejected pipeline option")
                .with_fix_hint("Run with --help to list the pipeline's declared options."),
        )
    })?;

    let overrides: Vec<(String, String)> = schema
        .params
        .iter()
        .filter_map(|spec| {
            matches
                .get_one::<String>(&spec.name)
                .map(|raw| (spec.name.clone(), raw.clone()))
        })
        .collect();

    schema.resolve_raw(overrides)
}
