//! LLM collaborator abstraction.
//!
//! The orchestrator treats the model as an opaque function: prompt text in,
//! raw response text out, within a caller-supplied timeout. [`CommandLlm`]
//! pipes the prompt to a configured subprocess. Tests use the scripted client
//! from `test_support` instead of spawning processes.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Anything that can answer a prompt.
pub trait LlmClient: Send + Sync {
    fn call(&self, prompt: &str, timeout: Duration)
    -> impl Future<Output = Result<String>> + Send;
}

/// Timeout and attempt budget for a single logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Total attempts, at least 1. Retries are immediate.
    pub max_attempts: u32,
}

/// Call `llm` under `policy`.
///
/// Each attempt is bounded by `policy.timeout`; a timeout counts as a failed
/// attempt. The last error is returned once attempts run out.
#[instrument(skip_all, fields(timeout_secs = policy.timeout.as_secs(), max_attempts = policy.max_attempts))]
pub async fn call_with_policy<L: LlmClient>(
    llm: &L,
    prompt: &str,
    policy: CallPolicy,
) -> Result<String> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = anyhow!("llm call was not attempted");

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, llm.call(prompt, policy.timeout)).await {
            Ok(Ok(text)) => {
                debug!(attempt, bytes = text.len(), "llm call succeeded");
                return Ok(text);
            }
            Ok(Err(err)) => {
                warn!(attempt, err = %err, "llm call failed");
                last_error = err;
            }
            Err(_) => {
                warn!(attempt, "llm call timed out");
                last_error = anyhow!("llm call timed out after {:?}", policy.timeout);
            }
        }
    }

    Err(last_error.context(format!("llm call failed after {attempts} attempt(s)")))
}

/// LLM collaborator backed by a subprocess.
///
/// The prompt is written to stdin; stdout is the response. A non-zero exit is
/// an error. The child is killed when the call is dropped, so an outer
/// timeout never leaves it running.
#[derive(Debug, Clone)]
pub struct CommandLlm {
    argv: Vec<String>,
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandLlm {
    pub fn new(argv: Vec<String>, workdir: PathBuf, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("llm command must be a non-empty array");
        }
        Ok(Self {
            argv,
            workdir,
            output_limit_bytes,
        })
    }
}

impl LlmClient for CommandLlm {
    #[instrument(skip_all, fields(program = %self.argv[0], timeout_secs = timeout.as_secs()))]
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("spawning llm command");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn llm command {}", self.argv[0]))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin is judged by its exit status.
        if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
            debug!(err = %err, "llm command closed stdin early");
        }
        drop(stdin);

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("llm command timed out after {timeout:?}"))?
            .context("wait for llm command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "llm command failed");
            bail!(
                "llm command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }

        let mut stdout = output.stdout;
        if stdout.len() > self.output_limit_bytes {
            warn!(
                truncated = stdout.len() - self.output_limit_bytes,
                "llm output truncated"
            );
            stdout.truncate(self.output_limit_bytes);
            // Drop the partial bytes of a multi-byte char split by the cut.
            if let Err(err) = std::str::from_utf8(&stdout)
                && err.error_len().is_none()
            {
                stdout.truncate(err.valid_up_to());
            }
        }
        String::from_utf8(stdout).context("llm output is not utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLlm;

    fn policy(timeout_ms: u64, max_attempts: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_attempts,
        }
    }

    fn command(argv: &[&str]) -> CommandLlm {
        let argv = argv.iter().map(|s| (*s).to_string()).collect();
        CommandLlm::new(argv, std::env::temp_dir(), 1024).expect("command llm")
    }

    #[tokio::test]
    async fn slow_response_surfaces_as_timeout() {
        let llm = ScriptedLlm::new().delayed("plan", Duration::from_millis(500), "{}");
        let err = call_with_policy(&llm, "plan this", policy(20, 1))
            .await
            .expect_err("should time out");
        assert!(format!("{err:#}").contains("timed out"));
    }

    /// A failed first attempt is retried when the policy allows it.
    #[tokio::test]
    async fn retries_until_attempts_run_out() {
        let llm = ScriptedLlm::new().fail("plan", "transport reset");
        let err = call_with_policy(&llm, "plan", policy(1_000, 3))
            .await
            .expect_err("all attempts fail");
        assert_eq!(llm.calls().len(), 3);
        assert!(format!("{err:#}").contains("after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn command_llm_echoes_stdin() {
        let llm = command(&["cat"]);
        let text = llm
            .call("{\"ok\":true}", Duration::from_secs(5))
            .await
            .expect("cat should succeed");
        assert_eq!(text, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn command_llm_reports_non_zero_exit() {
        let llm = command(&["sh", "-c", "echo boom >&2; exit 3"]);
        let err = llm
            .call("prompt", Duration::from_secs(5))
            .await
            .expect_err("non-zero exit");
        let message = format!("{err:#}");
        assert!(message.contains("Some(3)"));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn command_llm_times_out() {
        let llm = command(&["sleep", "5"]);
        let err = llm
            .call("", Duration::from_millis(50))
            .await
            .expect_err("should time out");
        assert!(format!("{err:#}").contains("timed out"));
    }

    #[tokio::test]
    async fn truncation_keeps_output_valid_utf8() {
        let argv = ["sh", "-c", r"printf '\303\251\303\251'"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let llm = CommandLlm::new(argv, std::env::temp_dir(), 3).expect("command llm");
        let text = llm
            .call("", Duration::from_secs(5))
            .await
            .expect("truncated output still decodes");
        assert_eq!(text, "é");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandLlm::new(Vec::new(), std::env::temp_dir(), 10).is_err());
        assert!(CommandLlm::new(vec![" ".to_string()], std::env::temp_dir(), 10).is_err());
    }
}
