//! healthdash command-line entry point

use std::process;

fn main() {
    healthdash::observability::init_logging();

    if let Err(e) = healthdash::cli::run() {
        eprintln!("error [{}]: {}", e.code(), e);
        process::exit(e.exit_code());
    }
}
