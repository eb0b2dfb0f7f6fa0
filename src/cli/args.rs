// src/cli/args.rs

//! Clap parsers for each command family.

use crate::models::{Platform, SequenceRange};
use anyhow::{Result, anyhow, bail};
use clap::{Args, Parser};

/// Connection and output flags shared by every command.
#[derive(Args, Debug, Default, Clone)]
pub struct ConnectionArgs {
    /// Login name, overriding the profile's.
    #[arg(short = 'U', long = "user")]
    pub user: Option<String>,

    /// Password, overriding the profile's.
    #[arg(short = 'P', long = "password")]
    pub password: Option<String>,

    /// Target platform, overriding the profile's (`-MSSQL` / `-SYBASE`).
    #[arg(long)]
    pub platform: Option<String>,

    /// Writes all output to this file instead of the console.
    #[arg(short = 'O', long = "output")]
    pub output: Option<String>,

    /// Rebuilds the option set even when the cache is fresh.
    #[arg(long)]
    pub rebuild_options: bool,
}

impl ConnectionArgs {
    /// The `--platform` override, if given.
    pub fn platform(&self) -> Result<Option<Platform>> {
        self.platform
            .as_deref()
            .map(|p| p.parse::<Platform>().map_err(|e| anyhow!(e)))
            .transpose()
    }
}

/// `runsql`, `runcreate` and `i_run_upgrade`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct ScriptArgs {
    /// The source file (SQL script, build script or upgrade file).
    pub source: String,

    /// Database to run in.
    pub database: Option<String>,

    /// Profile (environment) name. Without one, the legacy variables are used.
    pub profile: Option<String>,

    /// Database to run in; takes precedence over the positional one.
    #[arg(short = 'D', long = "database")]
    pub database_flag: Option<String>,

    /// Echoes the input before its results.
    #[arg(short = 'e', long = "echo")]
    pub echo: bool,

    /// First value of the sequence loop.
    #[arg(short = 'F', long = "first")]
    pub first: Option<i64>,

    /// Last value of the sequence loop.
    #[arg(short = 'L', long = "last")]
    pub last: Option<i64>,

    /// Writes the audit record (`y`, the default) or not (`n`).
    #[arg(long, value_name = "y|n", num_args = 0..=1, default_missing_value = "y")]
    pub changelog: Option<String>,

    /// Prints the resolved SQL without running it.
    #[arg(long)]
    pub preview: bool,

    /// Connection and output flags.
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

impl ScriptArgs {
    /// `-D` if given, otherwise the positional database.
    pub fn database(&self) -> Option<String> {
        self.database_flag.clone().or_else(|| self.database.clone())
    }

    /// Whether the audit record is written; `--changelog` alone means yes.
    pub fn changelog_enabled(&self) -> Result<bool> {
        parse_yes_no(self.changelog.as_deref())
    }

    /// A missing `-L` repeats `-F`; a missing `-F` starts at 1.
    pub fn sequence(&self) -> Option<SequenceRange> {
        match (self.first, self.last) {
            (None, None) => None,
            (Some(f), Some(l)) => Some(SequenceRange::new(f, l)),
            (Some(f), None) => Some(SequenceRange::new(f, f)),
            (None, Some(l)) => Some(SequenceRange::new(1, l)),
        }
    }
}

/// `isqlline`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct InlineArgs {
    /// The command to run, quoted as one argument.
    pub command: String,

    /// Database to run in.
    pub database: Option<String>,

    /// Profile (environment) name.
    pub profile: Option<String>,

    /// Database to run in; takes precedence over the positional one.
    #[arg(short = 'D', long = "database")]
    pub database_flag: Option<String>,

    /// Echoes the resolved command.
    #[arg(short = 'e', long = "echo")]
    pub echo: bool,

    /// Prints the resolved command without running it.
    #[arg(long)]
    pub preview: bool,

    /// Connection and output flags.
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

impl InlineArgs {
    /// `-D` if given, otherwise the positional database.
    pub fn database(&self) -> Option<String> {
        self.database_flag.clone().or_else(|| self.database.clone())
    }
}

/// `bcp`: one table to or from a tab-delimited file.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct BulkArgs {
    /// Table name, optionally qualified, placeholders allowed.
    pub table: String,

    /// `in` or `out`.
    pub direction: String,

    /// The data file.
    pub file: String,

    /// Profile (environment) name.
    pub profile: Option<String>,

    /// Database the table lives in, when not qualified.
    #[arg(short = 'D', long = "database")]
    pub database: Option<String>,

    /// Connection and output flags.
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

fn parse_yes_no(value: Option<&str>) -> Result<bool> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(true),
        Some(v) if v == "y" || v == "yes" => Ok(true),
        Some(v) if v == "n" || v == "no" => Ok(false),
        Some(v) => bail!("Invalid --changelog value '{}'. Expected y or n.", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_args_with_flags() {
        let args = ScriptArgs::try_parse_from([
            "a.sql", "sbnmaster", "dev", "-F", "2", "-L5", "-e", "-U", "bob", "--changelog", "n",
        ])
        .unwrap();
        assert_eq!(args.source, "a.sql");
        assert_eq!(args.database().as_deref(), Some("sbnmaster"));
        assert_eq!(args.profile.as_deref(), Some("dev"));
        assert_eq!(args.sequence(), Some(SequenceRange::new(2, 5)));
        assert!(args.echo);
        assert_eq!(args.connection.user.as_deref(), Some("bob"));
        assert!(!args.changelog_enabled().unwrap());
    }

    #[test]
    fn test_database_flag_wins_and_changelog_defaults_on() {
        let args = ScriptArgs::try_parse_from(["a.sql", "db1", "-D", "db2"]).unwrap();
        assert_eq!(args.database().as_deref(), Some("db2"));
        assert!(args.changelog_enabled().unwrap());

        let bare = ScriptArgs::try_parse_from(["a.sql", "--changelog"]).unwrap();
        assert!(bare.changelog_enabled().unwrap());
    }

    #[test]
    fn test_invalid_changelog_value() {
        let args = ScriptArgs::try_parse_from(["a.sql", "--changelog", "maybe"]).unwrap();
        assert!(args.changelog_enabled().is_err());
    }

    #[test]
    fn test_platform_override() {
        let args = InlineArgs::try_parse_from(["select 1", "--platform", "mssql"]).unwrap();
        assert_eq!(args.connection.platform().unwrap(), Some(Platform::Mssql));
    }
}
