// src/bin/runsql.rs

//! `runsql <file> [database] [profile]`: runs one SQL script.

fn main() {
    ibs::cli::dispatcher::run_and_exit("runsql", std::env::args().skip(1).collect())
}
