//! Shared helpers for the provisioning pipeline.

use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use indicatif::ProgressBar;
use tracing::debug;

/// Poll a readiness probe on a fixed interval until it yields a value or
/// the attempt budget is exhausted.
///
/// Probe errors and `None` results both count as "not yet ready"; only an
/// exhausted budget fails. Updates a spinner with the attempt count so a
/// long boot does not look like a hang. Tests inject a fake probe and a
/// zero interval instead of sleeping.
pub fn wait_for_readiness<T, F>(
    message: &str,
    mut probe: F,
    max_attempts: u32,
    interval: Duration,
) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    debug!(
        "Polling for readiness ({} attempts, {}s interval)",
        max_attempts,
        interval.as_secs()
    );

    let progress = ProgressBar::new_spinner();
    for attempt in 1..=max_attempts {
        progress.set_message(format!("{} (attempt {}/{})", message, attempt, max_attempts));
        progress.tick();

        match probe() {
            Ok(Some(value)) => {
                debug!("Ready after {} attempts", attempt);
                progress.finish_and_clear();
                return Ok(value);
            }
            Ok(None) => {
                debug!("Readiness probe attempt {} returned nothing", attempt);
            }
            Err(e) => {
                debug!("Readiness probe attempt {} failed: {}", attempt, e);
            }
        }

        if attempt < max_attempts {
            std::thread::sleep(interval);
        }
    }

    progress.finish_and_clear();
    Err(eyre!("Timed out after {} attempts", max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_success_stops_polling() {
        let mut calls = 0;
        let result = wait_for_readiness(
            "test",
            || {
                calls += 1;
                Ok((calls == 3).then(|| "ready".to_string()))
            },
            10,
            Duration::ZERO,
        );
        assert_eq!(result.unwrap(), "ready");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_budget_exhaustion_fails() {
        let mut calls = 0;
        let result: Result<String> = wait_for_readiness(
            "test",
            || {
                calls += 1;
                Ok(None)
            },
            5,
            Duration::ZERO,
        );
        assert!(result.unwrap_err().to_string().contains("5 attempts"));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_probe_errors_are_tolerated() {
        let mut calls = 0;
        let result = wait_for_readiness(
            "test",
            || {
                calls += 1;
                if calls < 2 {
                    Err(eyre!("not up yet"))
                } else {
                    Ok(Some(calls))
                }
            },
            10,
            Duration::ZERO,
        );
        assert_eq!(result.unwrap(), 2);
    }
}
