// src/bin/isqlline.rs

//! `isqlline "<sql>" [database] [profile]`: runs one inline command.

fn main() {
    ibs::cli::dispatcher::run_and_exit("isqlline", std::env::args().skip(1).collect())
}
