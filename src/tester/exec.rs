//! End-to-end execution of one job.
//!
//! The executor composes the workspace manager, the sandbox driver and the
//! result parser into one pipeline: resolve profile, materialise the
//! workspace, run the optional compile pre-pass, run the harness under a
//! wall-clock timeout, and hand back the decoded outcome. The workspace and
//! every container are released before `execute` returns, on success and on
//! every failure path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::client::err::ExecutionError;
use crate::langs::{LanguageProfile, LanguageRegistry};
use crate::runner::exec::{ContainerSpec, LogTail, Sandbox, SandboxDriver};
use crate::workspace::Workspace;

use super::model::{Job, JobOutcome};
use super::parse::ResultParser;

/// Cap on the buffered compile log carried in a `CompileError`.
const COMPILE_LOG_CAP: usize = 64 * 1024;

/// How long to keep reading in-flight log bytes after the run container has
/// exited, so a `final_result` written just before exit is not lost to
/// stream scheduling.
const LOG_DRAIN_GRACE: Duration = Duration::from_millis(500);

pub struct JobExecutor {
    driver: Arc<dyn SandboxDriver>,
    registry: Arc<LanguageRegistry>,
    workspace_root: PathBuf,
}

impl JobExecutor {
    pub fn new(
        driver: Arc<dyn SandboxDriver>,
        registry: Arc<LanguageRegistry>,
        workspace_root: PathBuf,
    ) -> JobExecutor {
        JobExecutor {
            driver,
            registry,
            workspace_root,
        }
    }

    /// Run one job to completion. Creates and destroys one workspace and up
    /// to two containers; none of them outlive this call.
    pub async fn execute(&self, job: &Job) -> Result<JobOutcome, ExecutionError> {
        let profile = self
            .registry
            .get(&job.language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(job.language.clone()))?;

        let workspace = Workspace::create(&self.workspace_root, job, profile)
            .await
            .map_err(ExecutionError::Workspace)?;

        let res = self.run_stages(job, profile, &workspace).await;
        workspace.destroy().await;
        res
    }

    async fn run_stages(
        &self,
        job: &Job,
        profile: &LanguageProfile,
        workspace: &Workspace,
    ) -> Result<JobOutcome, ExecutionError> {
        if !profile.compile_argv.is_empty() {
            self.compile(job, profile, workspace).await?;
        }

        let spec = ContainerSpec::run(&job.id, profile, workspace);
        let mut sandbox = self
            .driver
            .create(&spec)
            .await
            .map_err(ExecutionError::Sandbox)?;

        tracing::debug!(container = %spec.name, "Run container created");
        let res =
            run_and_parse(sandbox.as_mut(), Duration::from_millis(profile.timeout_millis)).await;
        sandbox.dispose().await;
        res
    }

    /// Compile pre-pass: build, start, buffer the log tail, await exit.
    /// A non-zero exit fails the job with the buffered tail attached.
    async fn compile(
        &self,
        job: &Job,
        profile: &LanguageProfile,
        workspace: &Workspace,
    ) -> Result<(), ExecutionError> {
        let spec = ContainerSpec::compile(&job.id, profile, workspace);
        let mut sandbox = self
            .driver
            .create(&spec)
            .await
            .map_err(ExecutionError::Sandbox)?;

        tracing::debug!(container = %spec.name, "Compile container created");
        let res = async {
            let mut logs = sandbox.start().await.map_err(ExecutionError::Sandbox)?;
            let mut tail = LogTail::new(COMPILE_LOG_CAP);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(bytes) => tail.append(&bytes),
                    Err(e) => tracing::debug!(error = %e, "Compile log stream error"),
                }
            }
            let code = sandbox.wait().await.map_err(ExecutionError::Sandbox)?;
            if code != 0 {
                tracing::info!(code, "Compile step failed");
                Err(ExecutionError::Compile(tail.into_string()))
            } else {
                Ok(())
            }
        }
        .await;
        sandbox.dispose().await;
        res
    }
}

/// Start the run container, pump its logs through the parser, and race the
/// wall-clock timer against container exit. Whichever fires first wins; the
/// loser is a no-op. The caller disposes the sandbox in all cases.
async fn run_and_parse(
    sandbox: &mut dyn Sandbox,
    timeout: Duration,
) -> Result<JobOutcome, ExecutionError> {
    let mut logs = sandbox.start().await.map_err(ExecutionError::Sandbox)?;
    let mut parser = ResultParser::new();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let wait = sandbox.wait();
    tokio::pin!(wait);

    let mut logs_done = false;
    let mut timer_fired = false;

    let exit_code = loop {
        tokio::select! {
            biased;

            _ = &mut deadline, if !timer_fired => {
                if parser.summary().is_none() {
                    tracing::info!(timeout_ms = timeout.as_millis() as u64, "Job timed out");
                    return Err(ExecutionError::Timeout);
                }
                // Result already in hand; keep pumping until the container
                // exits so the exit code check still applies.
                timer_fired = true;
            }

            exit = &mut wait => {
                break exit.map_err(ExecutionError::Sandbox)?;
            }

            chunk = logs.next(), if !logs_done => match chunk {
                Some(Ok(bytes)) => parser.push(&bytes),
                Some(Err(e)) => tracing::debug!(error = %e, "Run log stream error"),
                None => logs_done = true,
            },
        }
    };

    if !logs_done {
        // The exit waiter can win the race against bytes already in flight.
        let _ = tokio::time::timeout(LOG_DRAIN_GRACE, async {
            while let Some(chunk) = logs.next().await {
                if let Ok(bytes) = chunk {
                    parser.push(&bytes);
                }
            }
        })
        .await;
    }

    if exit_code != 0 {
        return Err(ExecutionError::ContainerExit(exit_code));
    }
    match parser.into_summary() {
        Some(summary) => Ok(JobOutcome::from(summary)),
        None => Err(ExecutionError::NoResult),
    }
}

#[cfg(test)]
mod tests;
