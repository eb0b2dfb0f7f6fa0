// src/bin/runcreate.rs

//! `runcreate <build script> [database] [profile]`: runs a build script.

fn main() {
    ibs::cli::dispatcher::run_and_exit("runcreate", std::env::args().skip(1).collect())
}
