//! Multi-cycle driver for `orchestrator loop`.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::norms::NormDecision;
use crate::cycle::{CycleFailedError, CycleOutcome, CycleReport, run_cycle};
use crate::io::config::OrchestratorConfig;
use crate::io::llm::LlmClient;
use crate::io::state_store::OrchestratorState;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum LoopStop {
    /// The requested number of cycles ran.
    MaxCycles { max_cycles: u32 },
    /// Pre-cycle norms refused to start the next cycle.
    Denied { decisions: Vec<NormDecision> },
    /// Too many planning failures in a row.
    ConsecutiveFailures { failures: u32, last_error: String },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOutcome {
    pub cycles_run: u32,
    pub cycles_failed: u32,
    pub stop: LoopStop,
}

/// Run cycles until `max_cycles` have run, a start is denied, or
/// `max_consecutive_failures` cycles fail in a row.
///
/// `after_cycle` sees every cycle result, typically to persist state. Errors
/// other than a failed planning step stop the loop immediately.
pub async fn run_loop<L, F>(
    state: &mut OrchestratorState,
    config: &OrchestratorConfig,
    llm: &L,
    max_cycles: u32,
    mut after_cycle: F,
) -> Result<LoopOutcome>
where
    L: LlmClient,
    F: FnMut(&OrchestratorState, Result<&CycleReport, &CycleFailedError>) -> Result<()>,
{
    let mut cycles_run = 0u32;
    let mut cycles_failed = 0u32;
    let mut consecutive = 0u32;

    while cycles_run < max_cycles {
        match run_cycle(state, config, llm).await {
            Ok(CycleOutcome::Denied { decisions }) => {
                info!(cycles_run, "loop stopped: cycle start denied");
                return Ok(LoopOutcome {
                    cycles_run,
                    cycles_failed,
                    stop: LoopStop::Denied { decisions },
                });
            }
            Ok(CycleOutcome::Completed(report)) => {
                cycles_run += 1;
                consecutive = 0;
                after_cycle(state, Ok(&report))?;
            }
            Err(err) => {
                let Some(failed) = err.downcast_ref::<CycleFailedError>() else {
                    return Err(err);
                };
                cycles_run += 1;
                cycles_failed += 1;
                consecutive += 1;
                after_cycle(state, Err(failed))?;
                if consecutive >= config.max_consecutive_failures {
                    warn!(consecutive, "loop halted after consecutive failures");
                    return Ok(LoopOutcome {
                        cycles_run,
                        cycles_failed,
                        stop: LoopStop::ConsecutiveFailures {
                            failures: consecutive,
                            last_error: failed.message.clone(),
                        },
                    });
                }
            }
        }
    }

    Ok(LoopOutcome {
        cycles_run,
        cycles_failed,
        stop: LoopStop::MaxCycles { max_cycles },
    })
}
