use crate::backup::{Outcome, Status};
use std::io::{self, Write};
use tracing::info;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_USAGE: u8 = 1;
pub const EXIT_PARTIAL_FAILURE: u8 = 99;

/// Writes one line per failed database to `out` and returns the exit code
/// for the run.
pub fn report<W: Write>(outcomes: &[Outcome], out: &mut W) -> io::Result<u8> {
    let mut failures = 0;
    for outcome in outcomes {
        match outcome.status {
            Status::Success(ref path) => info!("{}: {}", outcome.database, path.display()),
            Status::Failure(ref message) => {
                writeln!(
                    out,
                    "ERROR: backup of database '{}' failed: {}",
                    outcome.database, message
                )?;
                failures += 1;
            }
        }
    }

    if failures == 0 {
        info!("All {} database backup(s) completed", outcomes.len());
        Ok(EXIT_SUCCESS)
    } else {
        info!(
            "{} of {} database backup(s) failed",
            failures,
            outcomes.len()
        );
        Ok(EXIT_PARTIAL_FAILURE)
    }
}
