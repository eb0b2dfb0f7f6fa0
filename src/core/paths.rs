// src/core/paths.rs

//! Source-root markers, symbolic path expansion and tool directories.

use crate::constants::{CACHE_DIR_ENV_VAR, SETTINGS_ENV_VAR, SETTINGS_FILENAME};
use anyhow::{Result, anyhow};
use std::path::{MAIN_SEPARATOR, PathBuf};
use thiserror::Error;

/// Failures locating settings, cache or output paths.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not find system cache directory.")]
    CacheDirNotFound,
}

/// Short path segments used throughout the build scripts, and their expansion.
/// Longer segments come first so `/ss/` only matches what nothing else did.
const SYMBOLIC_SEGMENTS: &[(&str, &str)] = &[
    ("/ss/ap/", "/SQL_Sources/Accounts_Payable/"),
    ("/ss/ar/", "/SQL_Sources/Accounts_Receivable/"),
    ("/ss/ba/", "/SQL_Sources/Basics/"),
    ("/ss/bl/", "/SQL_Sources/Billing/"),
    ("/ss/cm/", "/SQL_Sources/Commissions/"),
    ("/ss/cs/", "/SQL_Sources/Customer_Service/"),
    ("/ss/ct/", "/SQL_Sources/Customer/"),
    ("/ss/dw/", "/SQL_Sources/Data_Warehouse/"),
    ("/ss/em/", "/SQL_Sources/Email/"),
    ("/ss/fe/", "/SQL_Sources/Front_End/"),
    ("/ss/ib/", "/SQL_Sources/Interfaces/"),
    ("/ss/in/", "/SQL_Sources/Inventory/"),
    ("/ss/mo/", "/SQL_Sources/Monitoring/"),
    ("/ss/or/", "/SQL_Sources/Orders/"),
    ("/ss/pm/", "/SQL_Sources/Payments/"),
    ("/ss/pr/", "/SQL_Sources/Products/"),
    ("/ss/ra/", "/SQL_Sources/Rating/"),
    ("/ss/rp/", "/SQL_Sources/Reports/"),
    ("/ss/sc/", "/SQL_Sources/Security/"),
    ("/ss/sv/", "/SQL_Sources/Service/"),
    ("/ss/tx/", "/SQL_Sources/Taxation/"),
    ("/ss/ut/", "/SQL_Sources/Utilities/"),
    ("/ss/wf/", "/SQL_Sources/Workflow/"),
    ("/ss/", "/SQL_Sources/"),
];

/// Expands `$ir>a>b>c` (or `$ir/a/b/c`) to `<source_root>/a/b/c`.
/// Anything else is returned unchanged.
pub fn expand_ir_marker(token: &str, source_root: &str) -> String {
    let lower = token.to_ascii_lowercase();
    if !lower.starts_with("$ir") {
        return token.to_string();
    }
    let rest = &token[3..];
    if !(rest.is_empty() || rest.starts_with('>') || rest.starts_with('/') || rest.starts_with('\\')) {
        return token.to_string();
    }
    let parts: Vec<&str> = rest
        .split(['>', '/', '\\'])
        .filter(|p| !p.is_empty())
        .collect();
    let root = source_root.trim_end_matches(['/', '\\']);
    if parts.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, parts.join("/"))
    }
}

/// Applies the symbolic segment table to a file reference that lives under a
/// `css` or `ibs` directory, and normalizes separators for the host.
pub fn expand_symbolic_path(reference: &str) -> PathBuf {
    let mut normalized = reference.replace('\\', "/");

    let applies = normalized
        .split('/')
        .any(|segment| segment.eq_ignore_ascii_case("css") || segment.eq_ignore_ascii_case("ibs"));

    if applies {
        for (short, long) in SYMBOLIC_SEGMENTS {
            normalized = replace_ignore_ascii_case(&normalized, short, long);
        }
    }

    let host = if MAIN_SEPARATOR == '/' {
        normalized
    } else {
        normalized.replace('/', &MAIN_SEPARATOR.to_string())
    };
    dunce::simplified(&PathBuf::from(host)).to_path_buf()
}

/// ASCII case-insensitive replacement of every occurrence of `from`.
fn replace_ignore_ascii_case(haystack: &str, from: &str, to: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let needle = from.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find(&needle) {
        let start = cursor + found;
        out.push_str(&haystack[cursor..start]);
        out.push_str(to);
        // Keep the trailing separator available for the next match.
        cursor = start + needle.len() - 1;
        out.pop();
    }
    out.push_str(&haystack[cursor..]);
    out
}

/// `$IBS_SETTINGS`, or `<config_dir>/ibs/settings.toml`.
pub fn settings_path() -> Result<PathBuf, PathError> {
    if let Ok(path) = std::env::var(SETTINGS_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("ibs").join(SETTINGS_FILENAME))
        .ok_or(PathError::ConfigDirNotFound)
}

/// `$IBS_CACHE_DIR`, or `<cache_dir>/ibs/options`.
pub fn option_cache_dir() -> Result<PathBuf, PathError> {
    if let Ok(path) = std::env::var(CACHE_DIR_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    dirs::cache_dir()
        .map(|dir| dir.join("ibs").join("options"))
        .ok_or(PathError::CacheDirNotFound)
}

/// Expands `~` and environment variables in a configured path.
pub fn expand_user_path(template: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(template)
        .map_err(|e| anyhow!("Failed to expand path '{}': {}", template, e))?;
    Ok(PathBuf::from(expanded.into_owned()))
}
