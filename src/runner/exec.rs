//! Creating, supervising and tearing down job containers.

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::{Buf, Bytes, BytesMut};
use derive_builder::Builder;
use futures::stream::{BoxStream, StreamExt};

use crate::langs::LanguageProfile;
use crate::workspace::Workspace;

use super::names::sanitize_for_container_name;

/// Mount point of the job workspace inside every container.
const WORK_DIR: &str = "/code";

/// How long a container gets to stop gracefully before it is killed, in
/// seconds.
const STOP_GRACE_SECS: i64 = 1;

/// Follow-stream of a container's combined stdout+stderr, raw bytes as the
/// runtime delivers them (multiplex framing included; stripping is the
/// result parser's job).
pub type LogStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Everything needed to create one job container.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub argv: Vec<String>,
    /// Host directory bind-mounted read-write at [`WORK_DIR`].
    pub workspace_dir: PathBuf,
    pub memory_limit_mib: i64,
    pub cpu_limit_cores: f64,
}

impl ContainerSpec {
    /// Spec for the compile pre-pass: the profile's compile argv plus the
    /// language's source filenames.
    pub fn compile(job_id: &str, profile: &LanguageProfile, workspace: &Workspace) -> ContainerSpec {
        let mut argv = profile.compile_argv.clone();
        argv.push(profile.solution_filename.clone());
        argv.push(profile.test_filename.clone());
        Self::build("compile", job_id, profile, workspace, argv)
    }

    /// Spec for the main run: the profile's run argv plus the run target
    /// (compiled artifact or harness file).
    pub fn run(job_id: &str, profile: &LanguageProfile, workspace: &Workspace) -> ContainerSpec {
        let mut argv = profile.run_argv.clone();
        argv.push(profile.run_target());
        Self::build("run", job_id, profile, workspace, argv)
    }

    fn build(
        stage: &str,
        job_id: &str,
        profile: &LanguageProfile,
        workspace: &Workspace,
        argv: Vec<String>,
    ) -> ContainerSpec {
        let name = format!(
            "agent-{}-{}-{:06x}",
            stage,
            sanitize_for_container_name(job_id),
            rand::random::<u32>() & 0xff_ffff
        );
        ContainerSpecBuilder::default()
            .name(name)
            .image(profile.image.clone())
            .argv(argv)
            .workspace_dir(workspace.path())
            .memory_limit_mib(profile.memory_limit_mib)
            .cpu_limit_cores(profile.cpu_limit_cores)
            .build()
            .expect("container spec fields are exhaustive")
    }
}

/// Creates sandboxes. The Docker implementation is the only one in
/// production; tests substitute scripted stubs.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Create a container for `spec`. The container is not started yet.
    async fn create(&self, spec: &ContainerSpec) -> anyhow::Result<Box<dyn Sandbox>>;
}

/// One created container, owned by exactly one job.
#[async_trait]
pub trait Sandbox: Send {
    /// Start the container and return the follow-stream of its logs.
    async fn start(&mut self) -> anyhow::Result<LogStream>;

    /// Await the container's exit and return its exit code.
    async fn wait(&mut self) -> anyhow::Result<i64>;

    /// Stop, then remove. Best effort on both; errors are logged and
    /// swallowed.
    async fn dispose(&mut self);
}

pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    pub fn new(docker: Docker) -> DockerDriver {
        DockerDriver { docker }
    }
}

#[async_trait]
impl SandboxDriver for DockerDriver {
    async fn create(&self, spec: &ContainerSpec) -> anyhow::Result<Box<dyn Sandbox>> {
        let sandbox = DockerSandbox::create(self.docker.clone(), spec).await?;
        Ok(Box::new(sandbox))
    }
}

pub struct DockerSandbox {
    docker: Docker,
    id: String,
    name: String,
}

impl DockerSandbox {
    /// Create a container with the hardening defaults applied: no network,
    /// auto-remove on exit, non-privileged, `no-new-privileges`.
    pub async fn create(docker: Docker, spec: &ContainerSpec) -> anyhow::Result<DockerSandbox> {
        let host_config = HostConfig {
            binds: Some(vec![format!("{}:{}", spec.workspace_dir.display(), WORK_DIR)]),
            memory: Some(spec.memory_limit_mib * 1024 * 1024),
            nano_cpus: Some((spec.cpu_limit_cores * 1e9) as i64),
            auto_remove: Some(true),
            privileged: Some(false),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            ..Default::default()
        };

        let res = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                Config {
                    image: Some(spec.image.clone()),
                    cmd: Some(spec.argv.clone()),
                    working_dir: Some(WORK_DIR.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    network_disabled: Some(true),
                    host_config: Some(host_config),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(name = %spec.name, id = %res.id, "Container created");
        Ok(DockerSandbox {
            docker,
            id: res.id,
            name: spec.name.clone(),
        })
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn start(&mut self) -> anyhow::Result<LogStream> {
        self.docker
            .start_container(&self.id, None::<StartContainerOptions<String>>)
            .await?;

        let logs = self
            .docker
            .logs(
                &self.id,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .map(|chunk| {
                chunk
                    .map(|log| log.into_bytes())
                    .map_err(anyhow::Error::from)
            })
            .boxed();
        Ok(logs)
    }

    async fn wait(&mut self) -> anyhow::Result<i64> {
        let mut wait = self.docker.wait_container(
            &self.id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        match wait.next().await {
            Some(Ok(res)) => Ok(res.status_code),
            // bollard reports non-zero exit codes through the error channel.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(anyhow::anyhow!(
                "wait stream for container {} ended without a status",
                self.name
            )),
        }
    }

    async fn dispose(&mut self) {
        if let Err(e) = self
            .docker
            .stop_container(&self.id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            tracing::debug!(name = %self.name, error = %e, "Container stop failed");
        }
        if let Err(e) = self
            .docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            // Expected most of the time: auto-remove already reaped it.
            tracing::debug!(name = %self.name, error = %e, "Container remove failed");
        }
    }
}

/// Rolling accumulator for the compile pre-pass log: retains the last `cap`
/// bytes, shifting out the oldest as new output arrives. A failing compile
/// prints its actual errors at the end of a possibly long, noisy log, so
/// the tail is the part worth reporting.
pub struct LogTail {
    cap: usize,
    buf: BytesMut,
    dropped: u64,
}

impl LogTail {
    pub fn new(cap: usize) -> LogTail {
        LogTail {
            cap,
            buf: BytesMut::new(),
            dropped: 0,
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.cap {
            // The chunk alone fills the window; everything buffered so far
            // is older than it.
            self.dropped += self.buf.len() as u64 + (chunk.len() - self.cap) as u64;
            self.buf.clear();
            self.buf.extend_from_slice(&chunk[chunk.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.advance(overflow);
            self.dropped += overflow as u64;
        }
        self.buf.extend_from_slice(chunk);
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn into_string(self) -> String {
        let text = String::from_utf8_lossy(&self.buf);
        if self.dropped > 0 {
            let mut s = String::with_capacity(text.len() + 64);
            writeln!(s, "--- {} earlier bytes dropped, log tail follows ---", self.dropped)
                .unwrap();
            s.push_str(&text);
            s
        } else {
            text.into_owned()
        }
    }
}
