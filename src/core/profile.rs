// src/core/profile.rs

//! Turns a profile name (or the legacy environment variables) into a
//! [`ResolvedEnvironment`].

use crate::{
    core::paths,
    models::{Platform, ProfileConfig, ResolvedEnvironment, SettingsFile},
};
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Failures reading or resolving profiles.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("No profile named '{0}' and no IR variable for the legacy fallback.")]
    NotFound(String),
    #[error("No profile given and no IR variable for the legacy fallback.")]
    NoProfile,
}

/// Source of named profiles.
pub trait ProfileStore {
    /// Looks a profile up by name or alias, case-insensitively.
    /// Returns the canonical name with the profile.
    fn find(&self, name: &str) -> Result<Option<(String, ProfileConfig)>, ProfileError>;
}

/// Profiles kept in the TOML settings file.
#[derive(Debug, Clone)]
pub struct TomlProfileStore {
    path: PathBuf,
}

impl TomlProfileStore {
    /// A store over the settings file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at `$IBS_SETTINGS` or the per-user config directory.
    pub fn from_default_location() -> Result<Self, paths::PathError> {
        paths::settings_path().map(Self::new)
    }

    /// The settings file this store reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing settings file is an empty one.
    pub fn load(&self) -> Result<SettingsFile, ProfileError> {
        if !self.path.exists() {
            log::debug!("Settings file '{}' not found; no named profiles.", self.path.display());
            return Ok(SettingsFile::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| ProfileError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ProfileError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl ProfileStore for TomlProfileStore {
    fn find(&self, name: &str) -> Result<Option<(String, ProfileConfig)>, ProfileError> {
        let settings = self.load()?;
        let mut by_alias = None;
        for (profile_name, profile) in settings.profiles {
            if profile_name.eq_ignore_ascii_case(name) {
                return Ok(Some((profile_name, profile)));
            }
            if by_alias.is_none() && profile.aliases.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                by_alias = Some((profile_name, profile));
            }
        }
        Ok(by_alias)
    }
}

/// Command-line values that win over the profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    /// `-U`.
    pub user: Option<String>,
    /// `-P`.
    pub password: Option<String>,
    /// `-MSSQL` / `-SYBASE`.
    pub platform: Option<Platform>,
}

/// Resolves `name` through `store`, falling back to the legacy variables
/// read through `lookup` (`IR`, `CMPY`, `IBSLANG`, `PLATFORM`, `DSQUERY`).
pub fn resolve_environment(
    store: &dyn ProfileStore,
    name: Option<&str>,
    overrides: &ProfileOverrides,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedEnvironment> {
    let found = match name {
        Some(name) => store.find(name)?,
        None => None,
    };

    let mut env = match found {
        Some((profile_name, profile)) => {
            log::debug!("Using profile '{}'.", profile_name);
            from_profile(profile_name, profile)?
        }
        None => legacy_environment(name, &lookup)?,
    };

    if let Some(user) = &overrides.user {
        env.user = user.clone();
    }
    if let Some(password) = &overrides.password {
        env.password = password.clone();
    }
    if let Some(platform) = overrides.platform {
        env.platform = platform;
    }
    Ok(env)
}

fn from_profile(name: String, profile: ProfileConfig) -> Result<ResolvedEnvironment> {
    let sql_source_root = paths::expand_user_path(&profile.sql_source)
        .with_context(|| format!("Invalid sql_source for profile '{}'", name))?;
    Ok(ResolvedEnvironment {
        name,
        host: profile.host,
        port: profile.port,
        user: profile.user,
        password: profile.password,
        platform: profile.platform,
        company: profile.company,
        language: profile.language,
        sql_source_root,
        raw_mode: profile.raw_mode,
        is_named_profile: true,
    })
}

fn legacy_environment(
    name: Option<&str>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<ResolvedEnvironment, ProfileError> {
    let Some(root) = lookup("IR").filter(|v| !v.trim().is_empty()) else {
        return Err(match name {
            Some(name) => ProfileError::NotFound(name.to_string()),
            None => ProfileError::NoProfile,
        });
    };

    let host = name
        .map(str::to_string)
        .or_else(|| lookup("DSQUERY"))
        .unwrap_or_default();
    let platform = match lookup("PLATFORM") {
        Some(value) => value.parse().unwrap_or_else(|e: String| {
            log::warn!("{} Using SYBASE.", e);
            Platform::Sybase
        }),
        None => Platform::Sybase,
    };
    log::debug!("No named profile; using legacy environment for server '{}'.", host);

    Ok(ResolvedEnvironment {
        name: host.clone(),
        host,
        port: None,
        user: "sa".to_string(),
        password: String::new(),
        platform,
        company: lookup("CMPY").unwrap_or_else(|| "101".to_string()),
        language: lookup("IBSLANG").unwrap_or_else(|| "1".to_string()),
        sql_source_root: PathBuf::from(root),
        raw_mode: false,
        is_named_profile: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const SETTINGS: &str = r#"
[profiles.GONZO]
host = "gonzo.local"
port = 1433
user = "builder"
password = "pw"
platform = "MSSQL"
company = "101"
sql_source = "/srv/ibs"
aliases = ["g", "dev"]

[profiles.SBN]
host = "sbn"
company = "102"
language = "2"
sql_source = "/srv/sbn"
raw_mode = true
"#;

    fn store() -> (tempfile::TempDir, TomlProfileStore) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, SETTINGS).unwrap();
        (dir, TomlProfileStore::new(path))
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_profile_lookup_by_name_and_alias() {
        let (_dir, store) = store();
        let env = resolve_environment(&store, Some("gonzo"), &ProfileOverrides::default(), vars(&[])).unwrap();
        assert_eq!(env.name, "GONZO");
        assert_eq!(env.platform, Platform::Mssql);
        assert_eq!(env.effective_port(), 1433);
        assert!(env.is_named_profile);

        let env = resolve_environment(&store, Some("G"), &ProfileOverrides::default(), vars(&[])).unwrap();
        assert_eq!(env.name, "GONZO");

        let env = resolve_environment(&store, Some("sbn"), &ProfileOverrides::default(), vars(&[])).unwrap();
        assert_eq!(env.language, "2");
        assert!(env.raw_mode);
        assert_eq!(env.platform, Platform::Sybase);
    }

    #[test]
    fn test_command_line_overrides_win() {
        let (_dir, store) = store();
        let overrides = ProfileOverrides {
            user: Some("other".to_string()),
            password: Some("pw2".to_string()),
            platform: Some(Platform::Sybase),
        };
        let env = resolve_environment(&store, Some("GONZO"), &overrides, vars(&[])).unwrap();
        assert_eq!(env.user, "other");
        assert_eq!(env.password, "pw2");
        assert_eq!(env.platform, Platform::Sybase);
    }

    #[test]
    fn test_legacy_fallback_uses_environment_variables() {
        let (_dir, store) = store();
        let lookup = vars(&[("IR", "/legacy/ibs"), ("CMPY", "205"), ("PLATFORM", "mssql")]);
        let env = resolve_environment(&store, Some("SYBPROD"), &ProfileOverrides::default(), lookup).unwrap();
        assert!(!env.is_named_profile);
        assert_eq!(env.host, "SYBPROD");
        assert_eq!(env.company, "205");
        assert_eq!(env.language, "1");
        assert_eq!(env.platform, Platform::Mssql);
        assert_eq!(env.sql_source_root, PathBuf::from("/legacy/ibs"));
    }

    #[test]
    fn test_unknown_profile_without_legacy_variables_fails() {
        let (_dir, store) = store();
        let err = resolve_environment(&store, Some("nope"), &ProfileOverrides::default(), vars(&[])).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_missing_settings_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = TomlProfileStore::new(dir.path().join("absent.toml"));
        assert!(store.find("x").unwrap().is_none());
    }
}
