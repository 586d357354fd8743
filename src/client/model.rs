//! Wire protocol between agent and dispatcher.
//!
//! Every frame is a single JSON object with a `type` tag. Outbound frames
//! are additionally wrapped in [`Envelope`], which stamps the agent
//! identity and a non-decreasing timestamp onto the message.

use serde::{Deserialize, Serialize};

use crate::langs::LanguageProfile;
use crate::runner::stats::ResourceSample;
use crate::tester::model::{Job, JobOutcome};

/// Message sent from the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    Task { task: Job },
}

/// Message sent from the agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Emitted once per connection, immediately on connect.
    Register { resources: RegisterResources },

    /// Periodic/admission utilisation snapshot.
    ResourceUpdate { metrics: ResourceSample },

    /// Terminal message for a successfully executed job.
    #[serde(rename_all = "camelCase")]
    TaskComplete {
        task_id: String,
        result: JobOutcome,
        metrics: TaskMetrics,
    },

    /// Terminal message for a failed job.
    #[serde(rename_all = "camelCase")]
    TaskError {
        task_id: String,
        error: String,
        language: String,
        resources: Option<ResourceSample>,
    },

    /// Generic response to a malformed inbound frame.
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResources {
    /// Host core count.
    pub cpu: i64,
    /// Host RAM in MiB.
    pub memory: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    /// Job wall time in milliseconds, measured by the agent.
    pub execution_time: u64,
    pub language: String,
    pub resources: Option<ResourceSample>,
    pub lang_config: Option<LangConfig>,
}

/// The profile limits that were applied to the job, reported back so the
/// dispatcher can correlate admission decisions with observed usage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LangConfig {
    pub cpu_limit: f64,
    pub memory_limit: i64,
    pub timeout: u64,
    pub image: String,
    pub file_extension: String,
    pub run_command: String,
}

impl LangConfig {
    pub fn from_profile(profile: &LanguageProfile) -> LangConfig {
        LangConfig {
            cpu_limit: profile.cpu_limit_cores,
            memory_limit: profile.memory_limit_mib,
            timeout: profile.timeout_millis,
            image: profile.image.clone(),
            file_extension: profile.file_extension.clone(),
            run_command: profile.run_command(),
        }
    }
}

/// Outbound wrapper adding the agent identity and timestamp to a message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a> {
    pub agent_id: &'a str,
    pub timestamp: u64,
    #[serde(flatten)]
    pub msg: &'a ClientMsg,
}
