//! Rendering of check outcomes to the log

use tracing::{error, info};

use super::{all_passed, CheckOutcome};

/// Log a section title followed by one line per outcome.
///
/// Returns whether every outcome passed.
pub fn log_outcomes(title: &str, outcomes: &[CheckOutcome]) -> bool {
    info!("\n{}\n--------------------", title);
    for outcome in outcomes {
        if outcome.passed {
            info!("✓ {}", outcome.detail);
        } else {
            error!("✗ {}", outcome.detail);
        }
    }
    all_passed(outcomes)
}
