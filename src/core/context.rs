// src/core/context.rs

//! State borrowed by every runner for one invocation.

use crate::{
    CancellationToken,
    constants::{CHANGELOG_PROCEDURE, UPGRADE_PROGRAM_LABEL},
    core::options::OptionSet,
    models::ResolvedEnvironment,
    system::{backend::Backend, output::Output},
};

/// Everything a run needs, borrowed for the whole call tree.
pub struct RunContext<'a> {
    /// Target environment.
    pub env: &'a ResolvedEnvironment,
    /// Placeholder dictionary.
    pub options: &'a OptionSet,
    /// Opens server sessions.
    pub backend: &'a dyn Backend,
    /// Where results and errors are written.
    pub output: &'a mut Output,
    /// Checked between batches and lines.
    pub cancellation_token: &'a CancellationToken,
}

impl std::fmt::Debug for RunContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("env", &self.env.name)
            .field("platform", &self.backend.platform())
            .field("output", &self.output)
            .finish()
    }
}

impl RunContext<'_> {
    /// Placeholder resolution, or the text untouched in raw mode.
    pub fn resolve(&self, text: &str, sequence: Option<i64>) -> String {
        if self.env.raw_mode {
            text.to_string()
        } else {
            self.options.resolve(text, sequence)
        }
    }

    /// Resolves placeholders, or returns `text` unchanged in raw mode.
    pub fn resolve_word(&self, text: &str) -> String {
        self.resolve(text, None)
    }

    /// Writes a failure to the output target and the log.
    pub fn report_error(&mut self, message: &str) {
        log::debug!("Reported failure: {}", message);
        if let Err(e) = self.output.error(message) {
            log::warn!("Could not write to output: {}", e);
        }
    }

    /// Writes text to the output target.
    pub fn emit(&mut self, text: &str) {
        if let Err(e) = self.output.text(text) {
            log::warn!("Could not write to output: {}", e);
        }
    }
}

/// The changelog label for a program (`i_run_upgrade` is recorded as `UPGRADE`).
pub fn program_label(program: &str) -> String {
    if program.eq_ignore_ascii_case("i_run_upgrade") {
        UPGRADE_PROGRAM_LABEL.to_string()
    } else {
        program.to_ascii_uppercase()
    }
}

/// Replaces the value of every `-P` argument with `****`.
pub fn mask_password(command_line: &str) -> String {
    let mut masked = Vec::new();
    let mut mask_next = false;
    for token in command_line.split_whitespace() {
        if mask_next {
            masked.push("****".to_string());
            mask_next = false;
        } else if token == "-P" {
            masked.push(token.to_string());
            mask_next = true;
        } else if token.len() > 2 && token.starts_with("-P") {
            masked.push("-P****".to_string());
        } else {
            masked.push(token.to_string());
        }
    }
    masked.join(" ")
}

/// The audit statement for one top-level run, before placeholder resolution.
pub fn changelog_statement(program: &str, command_line: &str, user: &str) -> String {
    let quote = |s: &str| s.replace('\'', "''");
    format!(
        "exec {} @program = '{}', @command = '{}', @user_name = '{}'",
        CHANGELOG_PROCEDURE,
        quote(&program_label(program)),
        quote(&mask_password(command_line)),
        quote(user)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_masked_in_both_forms() {
        assert_eq!(
            mask_password("runsql a.sql -U sa -P secret GONZO"),
            "runsql a.sql -U sa -P **** GONZO"
        );
        assert_eq!(mask_password("runcreate b -Psecret"), "runcreate b -P****");
    }

    #[test]
    fn test_upgrade_is_recorded_with_its_label() {
        let sql = changelog_statement("i_run_upgrade", "i_run_upgrade sct_1.sql -P x", "o'neil");
        assert_eq!(
            sql,
            "exec &i_changelog& @program = 'UPGRADE', @command = 'i_run_upgrade sct_1.sql -P ****', @user_name = 'o''neil'"
        );
        assert_eq!(program_label("runcreate"), "RUNCREATE");
    }
}
