//! Checks the host clock against a public NTP pool.

use std::time::Duration;

use rsntp::SntpClient;

use crate::error::TimeSyncError;

pub const DEFAULT_TIME_SERVER: &str = "us.pool.ntp.org";
pub const ATTEMPTS: u32 = 2;

/// Offsets beyond this many seconds are worth a warning.
pub const HOST_CLOCK_WARNING_SECONDS: f64 = 1.0;

/// NTP time minus host time, in seconds.
pub fn check_host_clock(server: &str) -> Result<f64, TimeSyncError> {
    let mut client = SntpClient::new();
    client.set_timeout(Duration::from_secs(3));

    let mut last_error = String::new();
    for attempt in 1..=ATTEMPTS {
        match client.synchronize(server) {
            Ok(result) => {
                let offset = result.clock_offset().as_secs_f64();
                report_offset(offset);
                return Ok(offset);
            }
            Err(e) => {
                tracing::warn!("NTP attempt no. {} failed", attempt);
                last_error = e.to_string();
            }
        }
    }

    tracing::warn!(
        "Failed to check computer time against NTP, number of attempts: {}",
        ATTEMPTS
    );
    Err(TimeSyncError::NoAnswer {
        server: server.to_string(),
        attempts: ATTEMPTS,
        reason: last_error,
    })
}

fn report_offset(offset: f64) {
    if offset.abs() > HOST_CLOCK_WARNING_SECONDS {
        tracing::warn!(
            "Difference between NTP time and computer time: {:.1} sec. Correct the computer clock.",
            offset
        );
    } else {
        tracing::warn!("Difference between NTP time and computer time: {:.1} sec.", offset);
    }
}
