// src/core/build_script.rs

//! Tokenizer for build-script ("create script") lines.
//!
//! ```text
//! # comment
//! runsql $ir>css>ss>ba>users.sql -D&dbtbl& -D&dbrpt&
//! &if_mssql&runsql $ir>css>ss>ba>mssql_only.sql -D&dbtbl&
//! runsql $ir>css>ss>ba>seed.sql -F1 -L5 -D&dbtbl&
//! runcreate $ir>css>setup>create_basics
//! i_run_upgrade $ir>css>upgrades>sct_4711.sql -D&dbtbl&
//! import_options
//! ```

use crate::{core::paths::expand_ir_marker, models::SequenceRange};
use lazy_static::lazy_static;
use regex::Regex;
use std::{fmt, str::FromStr};

lazy_static! {
    static ref UPGRADE_ID_RE: Regex = Regex::new(r"(?i)sct_([^./\\]+)").unwrap();
}

/// The closed set of build-script commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildCommand {
    RunSql,
    RunCreate,
    RunUpgrade,
    ImportOptions,
    CreateTableLocations,
    InstallMessages,
    CompileActions,
    InstallRequiredFields,
}

impl BuildCommand {
    /// The command token as written in build scripts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunSql => "runsql",
            Self::RunCreate => "runcreate",
            Self::RunUpgrade => "i_run_upgrade",
            Self::ImportOptions => "import_options",
            Self::CreateTableLocations => "create_tbl_locations",
            Self::InstallMessages => "install_msg",
            Self::CompileActions => "compile_actions",
            Self::InstallRequiredFields => "install_required_fields",
        }
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Self::RunSql,
            Self::RunCreate,
            Self::RunUpgrade,
            Self::ImportOptions,
            Self::CreateTableLocations,
            Self::InstallMessages,
            Self::CompileActions,
            Self::InstallRequiredFields,
        ];
        all.into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown build command '{}'", s))
    }
}

/// One dispatchable build-script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLine {
    /// Which command the line runs.
    pub command: BuildCommand,
    /// The source file, when the command takes one.
    pub source: Option<String>,
    /// Every remaining argument that is not the source.
    pub args: Vec<String>,
    /// `-F`/`-L` loop range.
    pub sequence: Option<SequenceRange>,
    /// `-D` values, resolved and de-duplicated, in order of appearance.
    pub databases: Vec<String>,
}

impl BuildLine {
    /// Whether `flag` appears among the remaining arguments, ignoring case.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a.eq_ignore_ascii_case(flag))
    }
}

/// What a line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Blank or comment.
    Skip,
    /// Not a known command after resolution. Commented-out lines land here.
    Inert(String),
    Command(BuildLine),
}

/// Parses one line. `resolve` substitutes placeholders; `source_root`
/// replaces `$ir` markers.
pub fn parse_line(line: &str, resolve: &dyn Fn(&str) -> String, source_root: &str) -> ParsedLine {
    let mut text = line.trim();
    if let Some(rest) = strip_prefix_ignore_case(text, "#NT") {
        text = rest.trim_start();
    }
    if text.is_empty() || text.starts_with('#') {
        return ParsedLine::Skip;
    }

    let resolved_head;
    if text.starts_with('&') {
        if let Some(close) = text[1..].find('&') {
            let (head, rest) = text.split_at(close + 2);
            resolved_head = format!("{}{}", resolve(head), rest);
            text = resolved_head.trim();
        }
    }

    let (command_token, raw_args) = match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], &text[pos..]),
        None => (text, ""),
    };
    let Ok(command) = command_token.parse::<BuildCommand>() else {
        return ParsedLine::Inert(text.to_string());
    };

    // Whitespace tokens only; backslashes in paths are literal.
    let tokens = raw_args.split_whitespace().map(str::to_string);

    let mut args = Vec::new();
    let mut databases: Vec<String> = Vec::new();
    let mut first = None;
    let mut last = None;
    let mut iter = tokens.peekable();

    while let Some(token) = iter.next() {
        if token == "$1" || token == "-o" || is_server_reference(&token) {
            continue;
        }
        if token == "-S" && iter.peek().is_some_and(|next| is_server_reference(next)) {
            iter.next();
            continue;
        }
        if let Some(value) = flag_value(&token, "-F") {
            first = value.or_else(|| iter.next()).and_then(|v| v.parse::<i64>().ok());
            continue;
        }
        if let Some(value) = flag_value(&token, "-L") {
            last = value.or_else(|| iter.next()).and_then(|v| v.parse::<i64>().ok());
            continue;
        }
        if let Some(value) = flag_value(&token, "-D") {
            if let Some(db) = value.or_else(|| iter.next()) {
                let db = resolve(&db);
                if !db.is_empty() && !databases.contains(&db) {
                    databases.push(db);
                }
            }
            continue;
        }
        args.push(expand_ir_marker(&token, source_root));
    }

    let sequence = match (first, last) {
        (None, None) => None,
        (Some(f), Some(l)) => Some(SequenceRange::new(f, l)),
        (Some(f), None) => Some(SequenceRange::new(f, f)),
        (None, Some(l)) => Some(SequenceRange::new(1, l)),
    };

    let source = match args.iter().position(|a| !a.starts_with('-')) {
        Some(pos) => Some(resolve(&args.remove(pos))),
        None => None,
    };

    ParsedLine::Command(BuildLine {
        command,
        source,
        args,
        sequence,
        databases,
    })
}

/// `-Sxxx&sv&` style server references, which the fixed environment makes redundant.
fn is_server_reference(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    lower == "&sv&" || lower == "-s&sv&"
}

/// For `-Xvalue` returns `Some(Some(value))`, for a bare `-X` `Some(None)`.
fn flag_value(token: &str, flag: &str) -> Option<Option<String>> {
    let rest = strip_prefix_ignore_case(token, flag)?;
    if rest.is_empty() {
        Some(None)
    } else {
        Some(Some(rest.to_string()))
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    match (text.get(..prefix.len()), text.get(prefix.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(prefix) => Some(rest),
        _ => None,
    }
}

/// The upgrade number embedded in an upgrade file name (`.../sct_4711.sql` gives `4711`).
pub fn upgrade_id_from_path(path: &str) -> Option<String> {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    UPGRADE_ID_RE
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}
