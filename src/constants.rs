// src/constants.rs

//! File names, widths and server-side object placeholders.

/// Directory (relative to the SQL source root) holding option and metadata sources.
pub const SETUP_DIR: &[&str] = &["CSS", "Setup"];

/// Optional platform-default option file.
pub const DEFAULT_OPTIONS_FILENAME: &str = "options.def";

/// Prefix of the company (`options.<company>`) and profile
/// (`options.<company>.<profile>`) option files.
pub const OPTIONS_FILENAME_PREFIX: &str = "options";

/// Required table-mapping file.
pub const TABLE_LOCATIONS_FILENAME: &str = "table_locations";

/// Width of the name field in a serialized option record.
pub const OPTION_NAME_WIDTH: usize = 40;

/// Width of the value field in a serialized option record.
pub const OPTION_VALUE_WIDTH: usize = 200;

/// Default age (minutes) after which the option cache is rebuilt.
pub const DEFAULT_CACHE_MAX_AGE_MINUTES: u64 = 60;

/// Opening marker produced by disabled conditional blocks.
pub const COMMENT_OPEN: &str = "/*";

/// Closing marker produced by disabled conditional blocks.
pub const COMMENT_CLOSE: &str = "*/";

/// Token replaced by the current loop value before placeholder resolution.
pub const SEQUENCE_TOKEN: &str = "@sequence@";

/// Number of rows between bulk-copy progress notifications.
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Maximum number of rows per generated `INSERT ... VALUES` statement.
pub const INSERT_ROWS_PER_STATEMENT: usize = 1000;

/// Maximum nesting of `runcreate` calls.
pub const MAX_BUILD_DEPTH: usize = 32;

/// Server messages at or below this severity are informational.
pub const INFO_SEVERITY_MAX: u32 = 10;

// --- Server-side objects (resolved through table_locations) ---

/// Audit procedure called once per top-level run.
pub const CHANGELOG_PROCEDURE: &str = "&i_changelog&";

/// Upgrade pre-check procedure.
pub const UPGRADE_CHECK_PROCEDURE: &str = "&i_upgrade_check&";

/// Upgrade control table.
pub const UPGRADE_TABLE: &str = "&ba_upgrades&";

/// Program label recorded for `i_run_upgrade` in the changelog.
pub const UPGRADE_PROGRAM_LABEL: &str = "UPGRADE";

// --- Settings & environment ---

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV_VAR: &str = "IBS_SETTINGS";

/// Name of the settings file inside the config directory.
pub const SETTINGS_FILENAME: &str = "settings.toml";

/// Environment variable overriding the option cache directory.
pub const CACHE_DIR_ENV_VAR: &str = "IBS_CACHE_DIR";

/// Environment variable overriding the option cache age threshold (minutes).
pub const CACHE_AGE_ENV_VAR: &str = "IBS_OPTIONS_CACHE_MINUTES";
