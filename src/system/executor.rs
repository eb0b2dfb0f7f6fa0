// src/system/executor.rs

//! Spawning and capturing vendor client processes.

use crate::CancellationToken;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command as StdCommand, Stdio};
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to a server or a vendor client.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Could not connect to '{server}': {message}")]
    Connect { server: String, message: String },
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with a non-zero error code.\n{output}")]
    NonZeroExitStatus { command: String, output: String },
    #[error("Server error: {0}")]
    Server(String),
    #[error("Unexpected response from server: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// Fails with `Cancelled` once the token has been set.
pub fn check_for_cancellation(token: &CancellationToken) -> Result<(), ExecutionError> {
    if token.load(Ordering::SeqCst) {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Renders a program invocation for messages, with the value after `-P` masked.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            parts.push("****".to_string());
            mask_next = false;
        } else {
            mask_next = arg == "-P";
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

/// Spawns a vendor client with piped stdin/stdout for an interactive session.
pub fn spawn_session(program: &str, args: &[String]) -> Result<Child, ExecutionError> {
    StdCommand::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(display_command(program, args), e))
}

/// Runs a command to completion and returns its standard output.
///
/// The wait loop polls the cancellation token; on cancellation the child is
/// killed and `Cancelled` is returned.
pub fn run_and_capture(
    program: &str,
    args: &[String],
    cancellation_token: &CancellationToken,
) -> Result<String, ExecutionError> {
    check_for_cancellation(cancellation_token)?;
    let shown = display_command(program, args);

    let mut child = match StdCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("'{}' was not found on PATH.", program);
            return Err(ExecutionError::CommandFailed(shown, e));
        }
        Err(e) => return Err(ExecutionError::CommandFailed(shown, e)),
    };

    // Drain both pipes on helper threads so a chatty child cannot block on a full pipe.
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    // Non-blocking wait loop to allow for cancellation.
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if check_for_cancellation(cancellation_token).is_err() {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    return Err(ExecutionError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(ExecutionError::CommandFailed(shown, e)),
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(ExecutionError::NonZeroExitStatus {
            command: shown,
            output: format!("{}{}", stdout, stderr),
        });
    }
    Ok(stdout)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            if pipe.read_to_end(&mut bytes).is_ok() {
                buffer = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        buffer
    })
}
