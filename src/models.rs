// src/models.rs

//! Profiles, resolved environments, per-command variables and run outcomes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::SETUP_DIR;

// --- PLATFORM ---

/// The database platform a profile targets.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    #[default]
    Sybase,
    Mssql,
}

impl Platform {
    /// Canonical upper-case name, as written in settings and cache file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sybase => "SYBASE",
            Self::Mssql => "MSSQL",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SYBASE" | "ASE" => Ok(Self::Sybase),
            "MSSQL" | "SQLSERVER" => Ok(Self::Mssql),
            other => Err(format!("Unknown platform '{}'. Expected SYBASE or MSSQL.", other)),
        }
    }
}

// --- SETTINGS FILE MODELS (What is read from settings.toml) ---

/// One `[profiles.<name>]` table of the settings file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    /// Server host (MSSQL) or server name (Sybase).
    pub host: String,
    /// Defaults to 1433 (MSSQL) or 5000 (Sybase).
    pub port: Option<u16>,
    /// Login name.
    #[serde(default)]
    pub user: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
    /// `SYBASE` or `MSSQL`.
    #[serde(default)]
    pub platform: Platform,
    /// Company code selecting `options.<company>`.
    pub company: String,
    /// Language code, `1` when absent.
    #[serde(default = "default_language")]
    pub language: String,
    /// SQL source root; `~` and `$VAR` are expanded.
    pub sql_source: String,
    /// Runs SQL verbatim.
    #[serde(default)]
    pub raw_mode: bool,
    /// Other names this profile answers to.
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_language() -> String {
    "1".to_string()
}

/// The deserialized structure of the settings file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SettingsFile {
    /// Profiles by name.
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

// --- RESOLVED ENVIRONMENT ---

/// Everything one invocation needs to know about its target.
/// Built once and shared, read-only, by the whole call tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    /// Profile name, or the server name for the legacy fallback.
    pub name: String,
    /// Server host or name.
    pub host: String,
    /// Explicit port, if any; see [`ResolvedEnvironment::effective_port`].
    pub port: Option<u16>,
    /// Login name after `-U`.
    pub user: String,
    /// Password after `-P`.
    pub password: String,
    /// Platform after `-MSSQL` / `-SYBASE`.
    pub platform: Platform,
    /// Company code.
    pub company: String,
    /// Language code, substituted for `&lang&`.
    pub language: String,
    /// Root that `$ir` and `CSS/Setup` are relative to.
    pub sql_source_root: PathBuf,
    /// Runs SQL verbatim: no placeholders, no audit, no compilers.
    pub raw_mode: bool,
    /// False when resolved from the legacy variables.
    pub is_named_profile: bool,
}

impl ResolvedEnvironment {
    /// `<sqlSourceRoot>/CSS/Setup`
    pub fn setup_dir(&self) -> PathBuf {
        SETUP_DIR
            .iter()
            .fold(self.sql_source_root.clone(), |path, part| path.join(part))
    }

    /// The default port for the platform when the profile does not give one.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.platform {
            Platform::Sybase => 5000,
            Platform::Mssql => 1433,
        })
    }
}

// --- COMMAND STATE ---

/// An inclusive `-F<first> -L<last>` loop range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    /// First value, inclusive.
    pub first: i64,
    /// Last value, inclusive.
    pub last: i64,
}

impl SequenceRange {
    /// A range; `first > last` is rejected by the runner, not here.
    pub fn new(first: i64, last: i64) -> Self {
        Self { first, last }
    }
}

/// Per-invocation state threaded through the script runner and orchestrator.
#[derive(Debug, Clone, Default)]
pub struct CommandVariables {
    /// A file path (runsql, runcreate, upgrade) or inline SQL (isqlline).
    pub source: String,
    /// Database to run in; `None` keeps the login default.
    pub database: Option<String>,
    /// `@sequence@` loop, one connection per value.
    pub sequence: Option<SequenceRange>,
    /// Echo numbered input lines before results.
    pub echo_input: bool,
    /// The `-O` target, if any.
    pub output_file: Option<PathBuf>,
    /// Write the audit record first.
    pub changelog: bool,
    /// Write resolved text instead of executing it.
    pub preview: bool,
    /// Upgrade id; derived from the file name when absent.
    pub upgrade_number: Option<String>,
    /// The (password-masked) command line recorded by the changelog.
    pub command_line: String,
}

impl CommandVariables {
    /// A copy for a nested dispatch: same output settings, changelog off.
    pub fn nested(&self, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            database: self.database.clone(),
            sequence: None,
            echo_input: self.echo_input,
            output_file: self.output_file.clone(),
            changelog: false,
            preview: self.preview,
            upgrade_number: None,
            command_line: String::new(),
        }
    }
}

// --- OUTCOMES ---

/// Aggregated result of a run: how many units executed and how many failed.
/// Server-side failures land here; fatal errors travel as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[must_use]
pub struct RunOutcome {
    /// Units run.
    pub executed: usize,
    /// Units that failed.
    pub failed: usize,
}

impl RunOutcome {
    /// One unit, succeeded.
    pub fn success() -> Self {
        Self { executed: 1, failed: 0 }
    }

    /// One unit, failed.
    pub fn failure() -> Self {
        Self { executed: 1, failed: 1 }
    }

    /// One unit, succeeded or failed.
    pub fn from_success(ok: bool) -> Self {
        if ok { Self::success() } else { Self::failure() }
    }

    /// No unit failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Adds `other`'s counts to these.
    pub fn merge(&mut self, other: Self) {
        self.executed += other.executed;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parsing_is_case_insensitive() {
        assert_eq!("mssql".parse::<Platform>().unwrap(), Platform::Mssql);
        assert_eq!(" Sybase ".parse::<Platform>().unwrap(), Platform::Sybase);
        assert!("oracle".parse::<Platform>().is_err());
    }

    #[test]
    fn test_outcome_merge_tracks_failures() {
        let mut total = RunOutcome::default();
        total.merge(RunOutcome::success());
        total.merge(RunOutcome::failure());
        assert_eq!(total.executed, 2);
        assert_eq!(total.failed, 1);
        assert!(!total.is_success());
    }

    #[test]
    fn test_profile_config_rejects_unknown_fields() {
        let toml_str = r#"
            host = "dbhost"
            company = "101"
            sql_source = "/ibs"
            pasword = "typo"
        "#;
        let result: Result<ProfileConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
