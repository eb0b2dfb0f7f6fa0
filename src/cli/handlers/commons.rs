// src/cli/handlers/commons.rs

//! Setup shared by every handler: environment, option set, backend, output.

use anyhow::{Context, Result, bail};
use std::{
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};
use tokio::runtime::Runtime;

use crate::{
    CancellationToken,
    cli::args::{ConnectionArgs, ScriptArgs},
    constants::{CACHE_AGE_ENV_VAR, DEFAULT_CACHE_MAX_AGE_MINUTES},
    core::{
        cache::FileOptionStore,
        context::RunContext,
        options::OptionSet,
        paths,
        profile::{ProfileOverrides, TomlProfileStore, resolve_environment},
    },
    models::{CommandVariables, ResolvedEnvironment, RunOutcome},
    system::{
        backend::{Backend, backend_for},
        output::Output,
    },
};

/// Everything one command invocation owns.
pub struct Invocation {
    /// The target environment.
    pub env: ResolvedEnvironment,
    /// Built option set; left empty in raw mode.
    pub options: OptionSet,
    /// Backend for the environment's platform.
    pub backend: Box<dyn Backend>,
    /// Console or `-O` file.
    pub output: Output,
    /// Set by Ctrl+C.
    pub cancellation_token: CancellationToken,
    // Keeps the MSSQL driver's runtime and the Ctrl+C listener alive.
    _runtime: Arc<Runtime>,
}

impl Invocation {
    /// Resolves the environment and builds the option set. Configuration
    /// errors surface here, before any SQL runs.
    pub fn prepare(
        profile: Option<&str>,
        connection: &ConnectionArgs,
        cancellation_token: &CancellationToken,
    ) -> Result<Self> {
        let store = TomlProfileStore::from_default_location()?;
        let overrides = ProfileOverrides {
            user: connection.user.clone(),
            password: connection.password.clone(),
            platform: connection.platform()?,
        };
        let env = resolve_environment(&store, profile, &overrides, |key| std::env::var(key).ok())?;
        log::debug!("Resolved environment: {} ({}) at {}", env.name, env.platform, env.host);

        let cache_dir = paths::option_cache_dir()?;
        let mut options = OptionSet::new(
            &env,
            Box::new(FileOptionStore::new(cache_dir)),
            cache_max_age(|key| std::env::var(key).ok()),
        );
        if !env.raw_mode {
            options
                .build(connection.rebuild_options)
                .with_context(|| format!("Failed to build the option set for '{}'", env.name))?;
        }

        let output_path: Option<PathBuf> = connection
            .output
            .as_deref()
            .map(paths::expand_user_path)
            .transpose()?;
        let output = Output::open(output_path.as_deref()).with_context(|| {
            format!(
                "Failed to open output file '{}'",
                output_path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
            )
        })?;

        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start the async runtime")?,
        );
        listen_for_interrupt(&runtime, cancellation_token);
        let backend = backend_for(&env, runtime.clone(), cancellation_token);

        Ok(Self {
            env,
            options,
            backend,
            output,
            cancellation_token: cancellation_token.clone(),
            _runtime: runtime,
        })
    }

    /// Borrows everything as a [`RunContext`].
    pub fn context(&mut self) -> RunContext<'_> {
        RunContext {
            env: &self.env,
            options: &self.options,
            backend: self.backend.as_ref(),
            output: &mut self.output,
            cancellation_token: &self.cancellation_token,
        }
    }

    /// Flushes output and turns a failed run into an error for the exit code.
    pub fn finish(mut self, outcome: RunOutcome) -> Result<()> {
        self.output.flush().context("Failed to flush output")?;
        if !outcome.is_success() {
            bail!("{} of {} unit(s) failed.", outcome.failed, outcome.executed);
        }
        Ok(())
    }
}

/// Sets the token on Ctrl+C. Runners poll it between batches.
fn listen_for_interrupt(runtime: &Runtime, cancellation_token: &CancellationToken) {
    let flag = cancellation_token.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; stopping after the current batch.");
            flag.store(true, Ordering::SeqCst);
        }
    });
}

/// Option cache staleness threshold, `IBS_OPTIONS_CACHE_MINUTES` or 60 minutes.
pub fn cache_max_age(lookup: impl Fn(&str) -> Option<String>) -> Duration {
    let minutes = lookup(CACHE_AGE_ENV_VAR)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_CACHE_MAX_AGE_MINUTES);
    Duration::from_secs(minutes * 60)
}

/// The invocation as typed, for the audit record.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|a| {
            if a.contains(char::is_whitespace) {
                format!("\"{}\"", a)
            } else {
                a.clone()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command variables for a file-based command.
pub fn script_variables(args: &ScriptArgs, command_line: String) -> Result<CommandVariables> {
    Ok(CommandVariables {
        source: args.source.clone(),
        database: args.database(),
        sequence: args.sequence(),
        echo_input: args.echo,
        output_file: args.connection.output.as_deref().map(PathBuf::from),
        changelog: args.changelog_enabled()?,
        preview: args.preview,
        upgrade_number: None,
        command_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cache_age_from_variable() {
        assert_eq!(cache_max_age(|_| Some("5".to_string())), Duration::from_secs(300));
        assert_eq!(cache_max_age(|_| Some("soon".to_string())), Duration::from_secs(3600));
        assert_eq!(cache_max_age(|_| None), Duration::from_secs(3600));
    }

    #[test]
    fn test_command_line_quotes_spaced_arguments() {
        let args = vec!["select 1".to_string(), "-P".to_string(), "x".to_string()];
        assert_eq!(command_line("isqlline", &args), "isqlline \"select 1\" -P x");
    }

    #[test]
    fn test_script_variables() {
        let args = ScriptArgs::try_parse_from(["b.sql", "-Ddb", "-F2", "--changelog", "n", "--preview"]).unwrap();
        let vars = script_variables(&args, "runsql b.sql".to_string()).unwrap();
        assert_eq!(vars.database.as_deref(), Some("db"));
        assert_eq!(vars.sequence.map(|s| (s.first, s.last)), Some((2, 2)));
        assert!(!vars.changelog);
        assert!(vars.preview);
    }
}
