//! The dispatcher link and the top-level job coordinator.
//!
//! The connection supervisor keeps one WebSocket to the dispatcher alive:
//! connect, register, read frames until the socket dies, back off, repeat.
//! Inbound `task` frames are spawned as independent tokio tasks; each task
//! wraps the executor with the telemetry publications the dispatcher
//! expects around a job.

pub mod config;
pub mod err;
pub mod model;
pub mod sink;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::Instrument;

use crate::langs::LanguageProfile;
use crate::runner::stats::{round2, ResourceSample};
use crate::tester::model::{Job, JobOutcome};

use self::config::SharedAgentData;
use self::err::ExecutionError;
use self::model::{ClientMsg, LangConfig, RegisterResources, ServerMsg, TaskMetrics};
use self::sink::{RawWsSink, WsStream};

/// Run the link forever: `Disconnected → Connecting → Connected` and back,
/// with a fixed delay between attempts. Only one attempt is ever in flight:
/// the next one is not scheduled until this one has fully resolved.
pub async fn connect_loop(data: Arc<SharedAgentData>) {
    let delay = Duration::from_millis(data.cfg.reconnect_delay_ms);
    loop {
        match connect_to_dispatcher(&data.cfg.dispatcher_url).await {
            Ok((ws_sink, ws_stream)) => {
                data.sink.load_socket(ws_sink);
                send_register(&data).await;
                client_loop(ws_stream, data.clone()).await;
                data.sink.clear_socket();
                tracing::warn!("Disconnected from dispatcher");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to connect to dispatcher");
            }
        }
        tokio::time::sleep(delay).await;
    }
}

async fn connect_to_dispatcher(
    url: &str,
) -> Result<(RawWsSink, WsStream), tungstenite::Error> {
    tracing::info!(%url, "Connecting to dispatcher");
    let (ws, _) = connect_async(url).await?;
    tracing::info!("Connection success");
    Ok(ws.split())
}

/// Emitted exactly once per successful connect.
async fn send_register(data: &SharedAgentData) {
    let resources = match data.probe.sample().await {
        Ok(sample) => RegisterResources {
            cpu: sample.cpu.total as i64,
            memory: sample.memory.total as i64,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Telemetry sample failed at register time");
            RegisterResources { cpu: 0, memory: 0 }
        }
    };
    let _ = data
        .sink
        .send_msg(&ClientMsg::Register { resources })
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Failed to send register message"));
}

/// Read frames until the socket closes or errors.
pub async fn client_loop(mut ws_recv: WsStream, data: Arc<SharedAgentData>) {
    while let Some(msg) = ws_recv.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Link receive error");
                break;
            }
        };
        match msg {
            Message::Text(payload) => dispatch_frame(&payload, &data).await,
            Message::Ping(_) | Message::Pong(_) => (),
            Message::Close(_) => break,
            other => tracing::warn!("Unsupported message: {:?}", other),
        }
    }
}

/// Decode one inbound frame. Malformed frames get an outbound `error`
/// message; structurally valid frames of unknown type are logged and
/// ignored.
async fn dispatch_frame(payload: &str, data: &Arc<SharedAgentData>) {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable inbound frame");
            send_error(data, format!("invalid message: {}", e)).await;
            return;
        }
    };
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    match kind.as_deref() {
        Some("task") => match serde_json::from_value::<ServerMsg>(value) {
            Ok(ServerMsg::Task { task }) => accept_task(task, data.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed task message");
                send_error(data, format!("malformed task message: {}", e)).await;
            }
        },
        Some(other) => {
            tracing::warn!(kind = %other, "Ignoring message of unknown type");
        }
        None => {
            send_error(data, "message is missing a `type` field".to_string()).await;
        }
    }
}

async fn send_error(data: &SharedAgentData, error: String) {
    let _ = data.sink.send_msg(&ClientMsg::Error { error }).await;
}

/// Spawn the job as its own task. Jobs are independent: nothing here
/// serialises them, and a slow job never blocks the read loop.
pub fn accept_task(job: Job, data: Arc<SharedAgentData>) {
    tracing::info!(job_id = %job.id, language = %job.language, "Received task");
    tokio::spawn(async move {
        let span = tracing::info_span!("handle_task", job_id = %job.id);
        handle_task_wrapper(job, data).instrument(span).await;
    });
}

pub async fn handle_task_wrapper(job: Job, data: Arc<SharedAgentData>) {
    let running = data.new_job();
    tracing::debug!(running, "Job started");

    // Admission signal: current utilisation plus this job's configured
    // limits. Not a measurement.
    match data.probe.sample().await {
        Ok(sample) => {
            let profile = data.registry.get(&job.language);
            let metrics = match profile {
                Some(profile) => admission_estimate(sample, profile),
                None => sample,
            };
            let _ = data.sink.send_msg(&ClientMsg::ResourceUpdate { metrics }).await;
        }
        Err(e) => tracing::warn!(error = %e, "Telemetry sample failed, skipping resourceUpdate"),
    }

    let started = Instant::now();
    let result = data.executor.execute(&job).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(outcome) => tracing::info!(
            elapsed_ms,
            passed = outcome.passed,
            failed = outcome.failed,
            "Job finished"
        ),
        Err(e) => tracing::warn!(elapsed_ms, error = %e, "Job failed"),
    }

    let resources = match data.probe.sample().await {
        Ok(sample) => Some(sample),
        Err(e) => {
            tracing::warn!(error = %e, "Telemetry sample failed around terminal message");
            None
        }
    };
    let profile = data.registry.get(&job.language);
    let terminal = terminal_msg(&job, result, elapsed_ms, resources, profile);
    let _ = data
        .sink
        .send_msg(&terminal)
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "Failed to send terminal message"));

    // Post-job utilisation, sampled rather than the admission delta.
    match data.probe.sample().await {
        Ok(metrics) => {
            let _ = data.sink.send_msg(&ClientMsg::ResourceUpdate { metrics }).await;
        }
        Err(e) => tracing::warn!(error = %e, "Telemetry sample failed, skipping resourceUpdate"),
    }

    let running = data.finish_job();
    tracing::debug!(running, "Job cleanup complete");
}

/// Bump a utilisation sample by the job's configured limits.
fn admission_estimate(mut sample: ResourceSample, profile: &LanguageProfile) -> ResourceSample {
    sample.cpu.used = round2(sample.cpu.used + profile.cpu_limit_cores);
    sample.memory.used += profile.memory_limit_mib as u64;
    sample
}

/// The single terminal message for a job: `taskComplete` or `taskError`.
fn terminal_msg(
    job: &Job,
    result: Result<JobOutcome, ExecutionError>,
    elapsed_ms: u64,
    resources: Option<ResourceSample>,
    profile: Option<&LanguageProfile>,
) -> ClientMsg {
    match result {
        Ok(outcome) => ClientMsg::TaskComplete {
            task_id: job.id.clone(),
            result: outcome,
            metrics: TaskMetrics {
                execution_time: elapsed_ms,
                language: job.language.clone(),
                resources,
                lang_config: profile.map(LangConfig::from_profile),
            },
        },
        Err(e) => ClientMsg::TaskError {
            task_id: job.id.clone(),
            error: e.to_string(),
            language: job.language.clone(),
            resources,
        },
    }
}
