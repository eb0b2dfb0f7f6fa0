// src/cli/mod.rs

//! Command-line surface: argument parsing, the command registry and the handlers.

use clap::Parser;

pub mod args;
pub mod dispatcher;
pub mod handlers;

/// ibs: soft-compiler and build orchestrator for IBS SQL sources.
///
/// `ibs <command> [args...]`, where command is one of `runsql`, `isqlline`,
/// `runcreate`, `i_run_upgrade` (alias `upgrade`) or `bcp`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// The command to run.
    pub command: Option<String>,

    /// Everything after the command, passed to its handler untouched.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Rewrites the historical flag spellings into ones clap understands.
///
/// `-MSSQL`/`-SYBASE` become `--platform <p>`, `--changelog:y` becomes
/// `--changelog y`, and `-F<n>`/`-L<n>` are split into flag and value.
pub fn normalize_legacy_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut normalized = Vec::new();
    for arg in args.into_iter().map(Into::into) {
        let upper = arg.to_ascii_uppercase();
        if upper == "-MSSQL" || upper == "-SYBASE" {
            normalized.push("--platform".to_string());
            normalized.push(upper[1..].to_string());
        } else if let Some(value) = arg.strip_prefix("--changelog:") {
            normalized.push("--changelog".to_string());
            normalized.push(value.to_string());
        } else if let Some((flag, value)) = split_numeric_flag(&arg) {
            normalized.push(flag.to_string());
            normalized.push(value.to_string());
        } else {
            normalized.push(arg);
        }
    }
    normalized
}

/// `-F12` gives `("-F", "12")`; anything else `None`.
fn split_numeric_flag(arg: &str) -> Option<(&str, &str)> {
    let (flag, value) = (arg.get(..2)?, arg.get(2..)?);
    let numeric = !value.is_empty() && value.trim_start_matches('-').chars().all(|c| c.is_ascii_digit());
    ((flag == "-F" || flag == "-L") && numeric).then_some((flag, value))
}
