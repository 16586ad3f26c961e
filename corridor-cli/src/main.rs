//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use corridor_core::RunOutcome;

fn main() {
    corridor_cli::init_logging();
    match corridor_cli::run() {
        Ok(RunOutcome::Failed) => {
            eprintln!("corridor: run failed; see the log for details");
            std::process::exit(1);
        }
        Ok(_) => {}
        Err(err) => {
            eprintln!("corridor: {err}");
            std::process::exit(1);
        }
    }
}
