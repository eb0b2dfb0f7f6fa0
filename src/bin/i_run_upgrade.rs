// src/bin/i_run_upgrade.rs

//! `i_run_upgrade <file> [database] [profile]`: applies one upgrade file.

fn main() {
    ibs::cli::dispatcher::run_and_exit("i_run_upgrade", std::env::args().skip(1).collect())
}
