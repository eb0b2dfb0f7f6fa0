// src/bin/ibs.rs

//! `ibs <command> [args...]`: every command behind one binary.

use clap::Parser;
use ibs::cli::{Cli, dispatcher};

/// `ibs <command> [args...]`
fn main() {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        eprintln!("Usage: ibs <runsql|isqlline|runcreate|i_run_upgrade|bcp> [args...]");
        std::process::exit(2);
    };
    dispatcher::run_and_exit(&command, cli.args)
}
