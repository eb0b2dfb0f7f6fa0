//! # Option Set
//!
//! The soft-compiler. Builds the merged placeholder dictionary for one
//! environment and resolves `&name&` tokens in SQL and build-script text.
//!
//! Merge order, lowest precedence first:
//!
//! 1. platform switches (`&if_mssql&`, `&if_sybase&`, ...) derived from the profile
//! 2. `options.def` (optional)
//! 3. `options.<company>` (required)
//! 4. `options.<company>.<profile>` (optional, warned when absent)
//! 5. `&cmpy&` and `&lang&` from the profile
//! 6. `table_locations` (required), resolved through everything above
//!
//! The merged list is persisted through an [`OptionStore`] as fixed-width
//! records (40-character name, 200-character value) and reused while fresh.

use crate::{
    constants::{
        COMMENT_CLOSE, COMMENT_OPEN, DEFAULT_OPTIONS_FILENAME, OPTION_NAME_WIDTH,
        OPTION_VALUE_WIDTH, OPTIONS_FILENAME_PREFIX, SEQUENCE_TOKEN, TABLE_LOCATIONS_FILENAME,
    },
    core::{
        cache::{CacheKey, OptionStore},
        option_file::{self, OptionDirective, OptionsError, placeholder},
    },
    models::{Platform, ResolvedEnvironment},
};
use anyhow::Result;
use std::{
    collections::HashMap,
    fmt::Write as _,
    path::PathBuf,
    time::Duration,
};

/// Upper bound on substitution passes, for values that contain placeholders.
const MAX_SUBSTITUTION_PASSES: usize = 10;

// --- ORDERED DICTIONARY ---

/// Insertion-ordered placeholder dictionary. Each name appears once; a later
/// insert overwrites the value but keeps the original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl OptionMap {
    /// Inserts or overwrites a record. Names wider than the record's name
    /// column are skipped with a warning, so the cached form stays aligned.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !fits_name_column(&name) {
            log::warn!("Option name '{}' exceeds {} characters; skipped.", name, OPTION_NAME_WIDTH);
            return;
        }
        let value = value.into();
        match self.index.get(&name) {
            Some(&pos) => {
                if let Some(entry) = self.entries.get_mut(pos) {
                    entry.1 = value;
                }
            }
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    /// The value recorded for a full `&name&` placeholder.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(name)
            .and_then(|&pos| self.entries.get(pos))
            .map(|(_, value)| value.as_str())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no record has been inserted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Inserts the four records a conditional directive expands to.
    /// The four are inserted together or not at all.
    pub fn insert_conditional(&mut self, name: &str, enabled: bool) {
        let widest = format!("&endifn_{}&", name);
        if !fits_name_column(&widest) {
            log::warn!("Conditional '{}' exceeds {} characters as '{}'; skipped.", name, OPTION_NAME_WIDTH, widest);
            return;
        }
        let (live_open, live_close, dead_open, dead_close) = if enabled {
            ("", "", COMMENT_OPEN, COMMENT_CLOSE)
        } else {
            (COMMENT_OPEN, COMMENT_CLOSE, "", "")
        };
        self.insert(format!("&if_{}&", name), live_open);
        self.insert(format!("&endif_{}&", name), live_close);
        self.insert(format!("&ifn_{}&", name), dead_open);
        self.insert(format!("&endifn_{}&", name), dead_close);
    }

    /// One left-to-right substitution pass. Returns `None` when nothing matched.
    fn substitute_once(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut changed = false;

        while let Some(start) = rest.find('&') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('&') {
                Some(len) => {
                    let end = start + len + 2;
                    let candidate = &rest[start..end];
                    if let Some(value) = self.get(candidate) {
                        out.push_str(value);
                        rest = &rest[end..];
                        changed = true;
                    } else {
                        // The closing '&' may open the next placeholder.
                        out.push('&');
                        rest = after;
                    }
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);

        changed.then_some(out)
    }

    /// Replaces every known placeholder in `text`, repeating while values
    /// introduce further placeholders.
    pub fn resolve_word(&self, text: &str) -> String {
        if !text.contains('&') {
            return text.to_string();
        }
        let mut current = text.to_string();
        for _ in 0..MAX_SUBSTITUTION_PASSES {
            match self.substitute_once(&current) {
                Some(next) if next.contains('&') => current = next,
                Some(next) => return next,
                None => break,
            }
        }
        current
    }

    /// Placeholder-shaped tokens in `text` that this map does not define.
    pub fn unresolved_placeholders(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find('&') {
            let after = &rest[start + 1..];
            let Some(len) = after.find('&') else { break };
            let name = &after[..len];
            let is_token = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '#' | '$'));
            if is_token {
                let token = format!("&{}&", name);
                if self.get(&token).is_none() && !found.contains(&token) {
                    found.push(token);
                }
                rest = &after[len + 1..];
            } else {
                rest = after;
            }
        }
        found
    }

    // --- FIXED-WIDTH RECORD FORM ---

    /// Serializes to one fixed-width record per line.
    pub fn to_records(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * (OPTION_NAME_WIDTH + OPTION_VALUE_WIDTH + 1));
        for (name, value) in &self.entries {
            // Padded in bytes: `from_records` splits the name column by byte offset.
            out.push_str(name);
            out.extend(std::iter::repeat_n(' ', OPTION_NAME_WIDTH.saturating_sub(name.len())));
            let _ = writeln!(out, "{:<value_w$}", value, value_w = OPTION_VALUE_WIDTH);
        }
        out
    }

    /// Parses the record form. Trailing padding is not significant.
    pub fn from_records(text: &str) -> Result<Self, String> {
        let mut map = Self::default();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = match (line.get(..OPTION_NAME_WIDTH), line.get(OPTION_NAME_WIDTH..)) {
                (Some(name), Some(value)) => (name.trim_end(), value.trim_end()),
                _ if line.len() <= OPTION_NAME_WIDTH => (line.trim_end(), ""),
                _ => return Err(format!("record {} is not aligned", number + 1)),
            };
            if !name.starts_with('&') || !name.ends_with('&') {
                return Err(format!("record {} has no placeholder name", number + 1));
            }
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Whether `name` fits the fixed-width name column of the record form.
fn fits_name_column(name: &str) -> bool {
    name.len() <= OPTION_NAME_WIDTH
}

// --- OPTION SET ---

/// The tier an option file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionTier {
    Default,
    Company,
    Profile,
}

impl OptionTier {
    /// Tier name recorded by `import_options`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Company => "company",
            Self::Profile => "profile",
        }
    }
}

/// The merged placeholder dictionary for one environment.
///
/// Owned by one invocation and passed by reference down the call tree.
pub struct OptionSet {
    key: CacheKey,
    setup_dir: PathBuf,
    platform: Platform,
    company: String,
    language: String,
    profile_name: String,
    store: Box<dyn OptionStore>,
    max_age: Duration,
    map: Option<OptionMap>,
}

impl std::fmt::Debug for OptionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionSet")
            .field("key", &self.key)
            .field("setup_dir", &self.setup_dir)
            .field("loaded", &self.map.as_ref().map(OptionMap::len))
            .finish()
    }
}

impl OptionSet {
    /// An unbuilt set for `env`. Call [`OptionSet::build`] before resolving.
    pub fn new(env: &ResolvedEnvironment, store: Box<dyn OptionStore>, max_age: Duration) -> Self {
        Self {
            key: CacheKey {
                platform: env.platform,
                company: env.company.clone(),
                environment: env.name.clone(),
            },
            setup_dir: env.setup_dir(),
            platform: env.platform,
            company: env.company.clone(),
            language: env.language.clone(),
            profile_name: env.name.clone(),
            store,
            max_age,
            map: None,
        }
    }

    /// Path of the option file for a tier.
    pub fn tier_path(&self, tier: OptionTier) -> PathBuf {
        let file_name = match tier {
            OptionTier::Default => DEFAULT_OPTIONS_FILENAME.to_string(),
            OptionTier::Company => format!("{}.{}", OPTIONS_FILENAME_PREFIX, self.company),
            OptionTier::Profile => {
                format!("{}.{}.{}", OPTIONS_FILENAME_PREFIX, self.company, self.profile_name)
            }
        };
        self.setup_dir.join(file_name)
    }

    /// Path of the `table_locations` file.
    pub fn table_locations_path(&self) -> PathBuf {
        self.setup_dir.join(TABLE_LOCATIONS_FILENAME)
    }

    /// `<sqlSourceRoot>/CSS/Setup`.
    pub fn setup_dir(&self) -> &PathBuf {
        &self.setup_dir
    }

    /// Whether [`OptionSet::build`] has run.
    pub fn is_built(&self) -> bool {
        self.map.is_some()
    }

    /// Every source this set depends on, existing or not.
    fn source_paths(&self) -> Vec<PathBuf> {
        vec![
            self.tier_path(OptionTier::Default),
            self.tier_path(OptionTier::Company),
            self.tier_path(OptionTier::Profile),
            self.table_locations_path(),
        ]
    }

    /// Builds (or reloads) the merged set.
    ///
    /// Without `force_rebuild`, an already-built set is kept and a fresh cache
    /// artifact is reused. Missing required files fail before anything else.
    pub fn build(&mut self, force_rebuild: bool) -> Result<()> {
        if self.map.is_some() && !force_rebuild {
            return Ok(());
        }

        let company_path = self.tier_path(OptionTier::Company);
        if !company_path.is_file() {
            return Err(OptionsError::MissingRequiredFile {
                kind: "company options",
                path: company_path.display().to_string(),
            }
            .into());
        }
        let locations_path = self.table_locations_path();
        if !locations_path.is_file() {
            return Err(OptionsError::MissingRequiredFile {
                kind: "table_locations",
                path: locations_path.display().to_string(),
            }
            .into());
        }

        if !force_rebuild {
            match self.store.load(&self.key) {
                Ok(Some(cached)) if cached.is_fresh(self.max_age, &self.source_paths()) => {
                    match OptionMap::from_records(&cached.text) {
                        Ok(map) => {
                            log::debug!("Option cache HIT for {:?} ({} records).", self.key, map.len());
                            self.map = Some(map);
                            return Ok(());
                        }
                        Err(reason) => log::warn!(
                            "{}: {}. Rebuilding.",
                            OptionsError::CorruptCache(self.key.file_name()),
                            reason
                        ),
                    }
                }
                Ok(_) => log::debug!("Option cache MISS for {:?}.", self.key),
                Err(e) => log::warn!("Option cache unreadable ({}). Rebuilding.", e),
            }
        }

        let map = self.compile()?;
        if let Err(e) = self.store.store(&self.key, &map.to_records()) {
            log::warn!("Could not write option cache: {:#}", e);
        }
        log::info!("Compiled {} option record(s) for '{}'.", map.len(), self.profile_name);
        self.map = Some(map);
        Ok(())
    }

    /// Reads every present tier and merges it, then the table mappings.
    fn compile(&self) -> Result<OptionMap> {
        let mut map = OptionMap::default();

        map.insert_conditional("mssql", self.platform == Platform::Mssql);
        map.insert_conditional("sybase", self.platform == Platform::Sybase);

        for tier in [OptionTier::Default, OptionTier::Company, OptionTier::Profile] {
            let path = self.tier_path(tier);
            if !path.is_file() {
                match tier {
                    OptionTier::Profile => log::warn!(
                        "Profile option file '{}' not found; using company options only.",
                        path.display()
                    ),
                    _ => log::debug!("Optional option file '{}' not present.", path.display()),
                }
                continue;
            }
            for source in option_file::parse_file(&path)? {
                merge_static_directive(&mut map, &source.directive);
            }
        }

        map.insert("&cmpy&", self.company.as_str());
        map.insert("&lang&", self.language.as_str());

        for source in option_file::parse_file(&self.table_locations_path())? {
            if let OptionDirective::TableMapping {
                table,
                db_placeholder,
                ..
            } = &source.directive
            {
                let database = map.resolve_word(db_placeholder);
                if database.contains('&') {
                    log::warn!(
                        "table_locations:{}: '{}' does not resolve for table '{}'.",
                        source.line_number,
                        db_placeholder,
                        table
                    );
                }
                map.insert(placeholder(table), format!("{}..{}", database, table));
                map.insert(format!("&db-{}&", table), database);
            }
        }

        Ok(map)
    }

    /// Replaces every known placeholder in `text`. Text without `&` is returned as is.
    pub fn resolve_word(&self, text: &str) -> String {
        match &self.map {
            Some(map) => map.resolve_word(text),
            None => text.to_string(),
        }
    }

    /// Substitutes `@sequence@` (when a value is given), then resolves placeholders.
    pub fn resolve(&self, text: &str, sequence: Option<i64>) -> String {
        match sequence {
            Some(n) if text.contains(SEQUENCE_TOKEN) => {
                self.resolve_word(&text.replace(SEQUENCE_TOKEN, &n.to_string()))
            }
            _ => self.resolve_word(text),
        }
    }

    /// Value of an option, by bare name or `&name&`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.as_ref().and_then(|m| m.get(&placeholder(name)))
    }

    /// Placeholders in `text` the set does not define.
    pub fn unresolved_placeholders(&self, text: &str) -> Vec<String> {
        self.map
            .as_ref()
            .map(|m| m.unresolved_placeholders(text))
            .unwrap_or_default()
    }
}

/// Applies one static directive to the map. Dynamic directives are resolved
/// by the server at run time and never substituted into SQL text.
fn merge_static_directive(map: &mut OptionMap, directive: &OptionDirective) {
    match directive {
        OptionDirective::Value {
            name,
            value,
            dynamic: false,
            ..
        } => map.insert(placeholder(name), value.as_str()),
        OptionDirective::Conditional {
            name,
            enabled,
            dynamic: false,
            ..
        } => map.insert_conditional(name, *enabled),
        _ => {}
    }
}
