//! One bulk-probe round against the engine.

use tracing::{debug, warn};

use super::RoundRetryPolicy;
use crate::engine::BulkProbeSender;
use crate::error::{Error, Result};
use crate::types::MeasurementBundle;

/// Drive the engine through one full round and collect its bundles.
///
/// Bundles are returned in the order the engine emitted them. A failed step
/// is retried immediately; its partial output is discarded. Under
/// [`RoundRetryPolicy::AbortAfter`] the round fails once that many steps
/// in a row have failed.
pub async fn run_round<E>(engine: &mut E, policy: RoundRetryPolicy) -> Result<Vec<MeasurementBundle>>
where
    E: BulkProbeSender + ?Sized,
{
    engine.reset_round().await;

    let mut round = Vec::new();
    let mut step = Vec::new();
    let mut failures: u32 = 0;
    let mut steps: u32 = 0;

    loop {
        step.clear();
        if !engine.do_one_measurement_round(&mut step).await {
            failures = bump(failures);
            warn!("Bulk-probe step failed ({} in a row), retrying", failures);
            if let RoundRetryPolicy::AbortAfter { attempts } = policy {
                if failures >= attempts {
                    return Err(Error::Measurement { attempts: failures });
                }
            }
            tokio::task::yield_now().await;
            continue;
        }

        failures = 0;
        steps = bump(steps);
        round.extend(step.iter().cloned());

        if engine.process_one_round_result(&mut step).await {
            debug!(
                "Bulk round complete: {} steps, {} bundles",
                steps,
                round.len()
            );
            return Ok(round);
        }
    }
}

/// Step counters stick at their maximum instead of wrapping.
fn bump(count: u32) -> u32 {
    count.saturating_add(1)
}
