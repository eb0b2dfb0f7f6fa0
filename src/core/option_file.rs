// src/core/option_file.rs

//! Parsing of the flat option sources (`options.*` and `table_locations`).
//!
//! One directive per line; anything that is not a directive is a comment.
//!
//! ```text
//! v: dbtbl <<sbnmaster>> main table database      static value
//! V: run_mode <<batch>> resolved by the server      dynamic value
//! c: mssql + platform switch                        static conditional
//! C: audit - resolved by the server                 dynamic conditional
//! -> users &dbtbl& customer accounts                table mapping
//! ```

use std::{fs, path::Path};
use thiserror::Error;

/// Errors raised while building an option set.
#[derive(Error, Debug)]
pub enum OptionsError {
    /// A file the build cannot proceed without is absent.
    #[error("Required {kind} file not found: '{path}'")]
    MissingRequiredFile { kind: &'static str, path: String },
    /// An option source could not be read.
    #[error("Failed to read option source '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The serialized cache could not be decoded.
    #[error("Option cache '{0}' is corrupt")]
    CorruptCache(String),
}

/// One parsed option-source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionDirective {
    /// `v:` / `V:`
    Value {
        name: String,
        value: String,
        description: String,
        dynamic: bool,
    },
    /// `c:` / `C:`
    Conditional {
        name: String,
        enabled: bool,
        description: String,
        dynamic: bool,
    },
    /// `->`
    TableMapping {
        table: String,
        db_placeholder: String,
        description: String,
    },
}

impl OptionDirective {
    /// The single-letter kind used when exporting directives to the server.
    pub fn kind_code(&self) -> &'static str {
        match self {
            Self::Value { dynamic: false, .. } => "v",
            Self::Value { dynamic: true, .. } => "V",
            Self::Conditional { dynamic: false, .. } => "c",
            Self::Conditional { dynamic: true, .. } => "C",
            Self::TableMapping { .. } => "->",
        }
    }
}

/// A directive together with the line it came from, for diagnostics.
#[derive(Debug, Clone)]
pub struct SourceDirective {
    /// 1-based line in the source file.
    pub line_number: usize,
    /// The parsed directive.
    pub directive: OptionDirective,
}

/// Strips optional `&` delimiters so `&name&` and `name` are the same option.
pub fn bare_name(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed
        .strip_prefix('&')
        .and_then(|s| s.strip_suffix('&'))
        .unwrap_or(trimmed)
}

/// Wraps a bare option name in `&` delimiters.
pub fn placeholder(name: &str) -> String {
    format!("&{}&", bare_name(name))
}

/// Splits `text` into its first whitespace-delimited token and the trimmed remainder.
fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim()),
        None => (text, ""),
    }
}

/// Parses one line. Returns `Ok(None)` for comments and blank lines and
/// `Err` with a reason for a directive that is malformed.
pub fn parse_line(line: &str) -> Result<Option<OptionDirective>, String> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("->") {
        let (table, rest) = split_token(rest);
        let (db_placeholder, description) = split_token(rest);
        if table.is_empty() || db_placeholder.is_empty() {
            return Err("table mapping needs a table name and a database placeholder".to_string());
        }
        return Ok(Some(OptionDirective::TableMapping {
            table: table.to_string(),
            db_placeholder: placeholder(db_placeholder),
            description: description.to_string(),
        }));
    }

    let (kind, body) = match line.get(..2) {
        Some(prefix @ ("v:" | "V:" | "c:" | "C:")) => (prefix, &line[2..]),
        _ => return Ok(None),
    };
    let dynamic = kind.starts_with(|c: char| c.is_ascii_uppercase());

    if kind.eq_ignore_ascii_case("v:") {
        let open = body
            .find("<<")
            .ok_or_else(|| "value directive is missing '<<'".to_string())?;
        let close = body[open + 2..]
            .find(">>")
            .map(|pos| pos + open + 2)
            .ok_or_else(|| "value directive is missing '>>'".to_string())?;
        let name = bare_name(&body[..open]);
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(format!("invalid option name '{}'", body[..open].trim()));
        }
        Ok(Some(OptionDirective::Value {
            name: name.to_string(),
            value: body[open + 2..close].to_string(),
            description: body[close + 2..].trim().to_string(),
            dynamic,
        }))
    } else {
        let (name, rest) = split_token(body);
        let (flag, description) = split_token(rest);
        let enabled = match flag {
            "+" => true,
            "-" => false,
            other => {
                return Err(format!(
                    "conditional '{}' must be followed by '+' or '-', found '{}'",
                    name, other
                ));
            }
        };
        if name.is_empty() {
            return Err("conditional directive has no name".to_string());
        }
        Ok(Some(OptionDirective::Conditional {
            name: bare_name(name).to_string(),
            enabled,
            description: description.to_string(),
            dynamic,
        }))
    }
}

/// Reads and parses a whole option source.
/// Malformed lines are logged and skipped; they never abort the build.
pub fn parse_file(path: &Path) -> Result<Vec<SourceDirective>, OptionsError> {
    let content = fs::read_to_string(path).map_err(|e| OptionsError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut directives = Vec::new();
    for (index, line) in content.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(directive)) => directives.push(SourceDirective {
                line_number: index + 1,
                directive,
            }),
            Ok(None) => {}
            Err(reason) => log::warn!(
                "{}:{}: ignoring malformed option line ({})",
                path.display(),
                index + 1,
                reason
            ),
        }
    }
    log::debug!(
        "Parsed {} directive(s) from '{}'",
        directives.len(),
        path.display()
    );
    Ok(directives)
}
