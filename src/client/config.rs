use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::langs::LanguageRegistry;
use crate::runner::exec::DockerDriver;
use crate::runner::stats::ResourceProbe;
use crate::tester::JobExecutor;

use super::sink::WebsocketSink;

/// Static configuration of the agent process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket endpoint of the dispatcher.
    pub dispatcher_url: String,
    /// Parent directory of per-job workspaces.
    pub workspace_root: PathBuf,
    /// Fixed delay between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            dispatcher_url: String::new(),
            workspace_root: PathBuf::from("./temp"),
            reconnect_delay_ms: 1000,
        }
    }
}

/// Long-lived state shared by the link supervisor and every job task.
pub struct SharedAgentData {
    pub cfg: AgentConfig,
    pub registry: Arc<LanguageRegistry>,
    pub executor: JobExecutor,
    pub probe: ResourceProbe,
    pub sink: WebsocketSink,
    running_jobs: AtomicUsize,
}

impl SharedAgentData {
    pub fn new(
        cfg: AgentConfig,
        docker: bollard::Docker,
        registry: Arc<LanguageRegistry>,
    ) -> SharedAgentData {
        let executor = JobExecutor::new(
            Arc::new(DockerDriver::new(docker.clone())),
            registry.clone(),
            cfg.workspace_root.clone(),
        );
        SharedAgentData {
            executor,
            registry,
            probe: ResourceProbe::new(docker),
            sink: WebsocketSink::new(),
            cfg,
            running_jobs: AtomicUsize::new(0),
        }
    }

    pub fn new_job(&self) -> usize {
        self.running_jobs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn finish_job(&self) -> usize {
        self.running_jobs.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn running_jobs(&self) -> usize {
        self.running_jobs.load(Ordering::SeqCst)
    }
}
