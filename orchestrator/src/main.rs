//! `orchestrator` CLI.
//!
//! State lives in `.orchestrator/` under the project root. Command results are
//! printed to stdout as JSON; diagnostics go to stderr via `RUST_LOG`.

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use orchestrator::contract::{parse_agent_output, parse_ceo_output};
use orchestrator::core::autonomy::{AutonomyScoreInput, compute_autonomy_score};
use orchestrator::core::context::{CycleContextBuilder, ObserveSnapshot};
use orchestrator::core::norms::{
    NormDecision, PreCycleNormInput, is_norm_allowed, run_pre_cycle_norms,
};
use orchestrator::cycle::{CycleFailedError, CycleOutcome, run_cycle_in};
use orchestrator::exit_codes;
use orchestrator::io::config::{OrchestratorConfig, load_config};
use orchestrator::io::init::{InitOptions, OrchestratorPaths, init_orchestrator};
use orchestrator::io::llm::CommandLlm;
use orchestrator::io::state_store::{OrchestratorState, load_state, write_state};
use orchestrator::logging;
use orchestrator::looping::{LoopStop, run_loop};
use orchestrator::validate::validate_orchestrator;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Policy-gated planning loop for a fleet of software agents"
)]
struct Cli {
    /// Project root containing `.orchestrator/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.orchestrator/` with default config and a locked frame.
    Init {
        /// Overwrite an existing `.orchestrator/`.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = "")]
        goal: String,
        #[arg(long, default_value = "")]
        constraints: String,
        #[arg(long, default_value = "")]
        verification: String,
    },
    /// Check config, plan schema and plan invariants.
    Validate,
    /// Print the observe-context the next planning prompt would carry.
    Context,
    /// Evaluate policy gates without running anything.
    Norms {
        #[command(subcommand)]
        gate: NormsGate,
    },
    /// Validate an LLM response file and print the normalized JSON.
    Parse {
        #[arg(value_enum)]
        kind: ContractKind,
        file: PathBuf,
    },
    /// Compute the autonomy score from raw counts.
    Score {
        #[arg(long, default_value_t = 0.0)]
        completed: f64,
        #[arg(long, default_value_t = 0.0)]
        total: f64,
        #[arg(long, default_value_t = 0.0)]
        interventions: f64,
        #[arg(long, default_value_t = 0.0)]
        violations: f64,
        #[arg(long, default_value_t = 0.0)]
        rework: f64,
    },
    /// Run one Observe → Plan → Act → Evaluate cycle.
    Cycle,
    /// Run cycles until the limit, a denied start, or repeated failures.
    Loop {
        #[arg(long, default_value_t = 10)]
        max_cycles: u32,
    },
}

#[derive(Subcommand)]
enum NormsGate {
    /// Decisions that gate the next cycle start.
    PreCycle,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContractKind {
    Ceo,
    Agent,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let paths = OrchestratorPaths::new(&cli.root);
    match cli.command {
        Command::Init {
            force,
            goal,
            constraints,
            verification,
        } => {
            let options = InitOptions {
                force,
                goal,
                constraints,
                verification,
            };
            let paths = init_orchestrator(&cli.root, &options)?;
            println!("{}", paths.dir.display());
            Ok(exit_codes::OK)
        }
        Command::Validate => {
            print_json(&validate_orchestrator(&cli.root)?)?;
            Ok(exit_codes::OK)
        }
        Command::Context => {
            let state = load_state(&paths.state_path)?;
            let context = CycleContextBuilder::default().build(&ObserveSnapshot {
                plan: state.plan.as_ref(),
                evidence: &state.evidence,
                agent_statuses: &state.agent_statuses,
                cycle_runs: &state.cycle_runs,
                broadcasts: &state.broadcasts,
                now_ms: Utc::now().timestamp_millis(),
            });
            println!("{}", context.render());
            Ok(exit_codes::OK)
        }
        Command::Norms {
            gate: NormsGate::PreCycle,
        } => {
            let config = load_config(&paths.config_path)?;
            let state = load_state(&paths.state_path)?;
            let decisions = pre_cycle_decisions(&config, &state);
            print_json(&decisions)?;
            Ok(if is_norm_allowed(&decisions) {
                exit_codes::OK
            } else {
                exit_codes::DENIED
            })
        }
        Command::Parse { kind, file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            match kind {
                ContractKind::Ceo => print_json(&parse_ceo_output(&raw)?)?,
                ContractKind::Agent => print_json(&parse_agent_output(&raw)?)?,
            }
            Ok(exit_codes::OK)
        }
        Command::Score {
            completed,
            total,
            interventions,
            violations,
            rework,
        } => {
            print_json(&compute_autonomy_score(&AutonomyScoreInput {
                completed_tasks: completed,
                total_tasks: total,
                interventions,
                violations,
                rework,
            }))?;
            Ok(exit_codes::OK)
        }
        Command::Cycle => {
            let config = load_config(&paths.config_path)?;
            let llm = command_llm(&config, &paths)?;
            match run_cycle_in(&paths, &llm).await {
                Ok(outcome) => {
                    print_json(&outcome)?;
                    Ok(match outcome {
                        CycleOutcome::Denied { .. } => exit_codes::DENIED,
                        CycleOutcome::Completed(_) => exit_codes::OK,
                    })
                }
                Err(err) => match err.downcast_ref::<CycleFailedError>() {
                    Some(failed) => {
                        eprintln!("{failed}");
                        Ok(exit_codes::CYCLE_FAILED)
                    }
                    None => Err(err),
                },
            }
        }
        Command::Loop { max_cycles } => {
            let config = load_config(&paths.config_path)?;
            let llm = command_llm(&config, &paths)?;
            let mut state = load_state(&paths.state_path)?;
            let outcome = run_loop(&mut state, &config, &llm, max_cycles, |state, _| {
                write_state(&paths.state_path, state)
            })
            .await?;
            print_json(&outcome)?;
            Ok(match outcome.stop {
                LoopStop::MaxCycles { .. } => exit_codes::OK,
                LoopStop::Denied { .. } => exit_codes::DENIED,
                LoopStop::ConsecutiveFailures { .. } => exit_codes::LOOP_HALTED,
            })
        }
    }
}

fn pre_cycle_decisions(
    config: &OrchestratorConfig,
    state: &OrchestratorState,
) -> Vec<NormDecision> {
    let active = config.active_agent_ids();
    run_pre_cycle_norms(&PreCycleNormInput {
        frame_locked: state.frame.locked,
        goal: &state.frame.goal,
        active_agent_ids: &active,
        budget_cap_usd: config.budget_cap_usd,
        estimated_cycle_cost_usd: config.estimated_cycle_cost_usd,
    })
}

fn command_llm(config: &OrchestratorConfig, paths: &OrchestratorPaths) -> Result<CommandLlm> {
    CommandLlm::new(
        config.llm.command.clone(),
        paths.root.clone(),
        config.llm_output_limit_bytes,
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
