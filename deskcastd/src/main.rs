//! deskcastd entry point.

use std::process::ExitCode;

use tracing::error;

fn main() -> ExitCode {
    match deskcastd::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("deskcastd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
