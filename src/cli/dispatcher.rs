// src/cli/dispatcher.rs

//! The command registry and the process entry shared by every binary.

use anyhow::{Result, anyhow};
use colored::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::{CancellationToken, cli::handlers, system::executor::ExecutionError};

// --- Command Definition and Registry ---

/// A command, its aliases, and its handler.
pub struct CommandDefinition {
    /// Canonical name, as shown in help and errors.
    pub name: &'static str,
    /// Other accepted names.
    pub aliases: &'static [&'static str],
    /// Receives the arguments after the command name.
    pub handler: fn(Vec<String>, &CancellationToken) -> Result<()>,
}

/// Every command `ibs` and the per-command binaries understand.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "runsql",
        aliases: &[],
        handler: handlers::runsql::handle,
    },
    CommandDefinition {
        name: "isqlline",
        aliases: &["isql"],
        handler: handlers::isqlline::handle,
    },
    CommandDefinition {
        name: "runcreate",
        aliases: &["create"],
        handler: handlers::runcreate::handle,
    },
    CommandDefinition {
        name: "i_run_upgrade",
        aliases: &["upgrade"],
        handler: handlers::upgrade::handle,
    },
    CommandDefinition {
        name: "bcp",
        aliases: &["bulk"],
        handler: handlers::bulk::handle,
    },
];

/// Finds a command by name or alias, ignoring case.
pub fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY.iter().find(|cmd| {
        cmd.name.eq_ignore_ascii_case(name) || cmd.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}

/// Runs `name` with `args`.
pub fn dispatch(name: &str, args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let command = find_command(name).ok_or_else(|| {
        let known: Vec<&str> = COMMAND_REGISTRY.iter().map(|c| c.name).collect();
        anyhow!("Unknown command '{}'. Known commands: {}", name, known.join(", "))
    })?;
    log::debug!("Dispatching '{}' with {:?}", command.name, args);
    (command.handler)(args, cancellation_token)
}

/// Process entry shared by every binary: logging, dispatch and exit codes.
///
/// Exits 0 on success, 130 when interrupted, 1 on any other failure.
pub fn run_and_exit(name: &str, args: Vec<String>) -> ! {
    env_logger::init();
    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));

    match dispatch(name, args, &cancellation_token) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let interrupted = matches!(e.downcast_ref::<ExecutionError>(), Some(ExecutionError::Cancelled));
            if interrupted {
                eprintln!("\n{}", "Interrupted.".yellow());
                std::process::exit(130);
            }
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_found_by_name_and_alias() {
        assert_eq!(find_command("runsql").map(|c| c.name), Some("runsql"));
        assert_eq!(find_command("UPGRADE").map(|c| c.name), Some("i_run_upgrade"));
        assert!(find_command("deploy").is_none());
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        let token = Arc::new(AtomicBool::new(false));
        let err = dispatch("deploy", Vec::new(), &token).unwrap_err();
        assert!(err.to_string().contains("Known commands: runsql"));
    }
}
