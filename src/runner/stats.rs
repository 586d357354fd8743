//! Host-aggregate resource sampling.
//!
//! The dispatcher uses these samples for admission control only, so the
//! numbers are deliberately coarse: one stats snapshot per running
//! container, summed, against host totals from the runtime.

use bollard::container::{ListContainersOptions, Stats, StatsOptions};
use bollard::Docker;
use futures::StreamExt;
use serde::Serialize;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuSample {
    /// Host core count.
    pub total: f64,
    /// Cores in use across all running containers.
    pub used: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    /// Host RAM in MiB.
    pub total: u64,
    /// MiB in use across all running containers.
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu: CpuSample,
    pub memory: MemorySample,
}

pub struct ResourceProbe {
    docker: Docker,
}

impl ResourceProbe {
    pub fn new(docker: Docker) -> ResourceProbe {
        ResourceProbe { docker }
    }

    /// One aggregate utilisation sample. Fails if the runtime is
    /// unreachable or a container vanishes mid-read; callers downgrade that
    /// to a skipped publication.
    pub async fn sample(&self) -> anyhow::Result<ResourceSample> {
        let info = self.docker.info().await?;
        let total_cpus = info.ncpu.unwrap_or_default() as f64;
        let total_mem_mib = round_mib(info.mem_total.unwrap_or_default() as u64);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        let mut used_cpus = 0f64;
        let mut used_mem_bytes = 0u64;
        for container in containers {
            let Some(id) = container.id else { continue };
            let mut stats = self.docker.stats(
                &id,
                Some(StatsOptions {
                    stream: false,
                    one_shot: false,
                }),
            );
            let Some(stat) = stats.next().await else { continue };
            let stat = stat?;
            used_cpus += cpu_cores_used(&stat);
            used_mem_bytes += stat.memory_stats.usage.unwrap_or(0);
        }

        Ok(ResourceSample {
            cpu: CpuSample {
                total: total_cpus,
                used: round2(used_cpus),
            },
            memory: MemorySample {
                total: total_mem_mib,
                used: round_mib(used_mem_bytes),
            },
        })
    }
}

/// Cores used by one container between the two snapshots the runtime takes
/// for a non-streaming stats read: `(cpuΔ / systemΔ) × onlineCpus`.
fn cpu_cores_used(stats: &Stats) -> f64 {
    let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
        - stats.precpu_stats.cpu_usage.total_usage as f64;
    let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
        - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
    if system_delta <= 0.0 || cpu_delta < 0.0 {
        return 0.0;
    }
    let online = stats
        .cpu_stats
        .online_cpus
        .or_else(|| {
            stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len() as u64)
        })
        .unwrap_or(1) as f64;
    cpu_delta / system_delta * online
}

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Round a byte count to the nearest whole MiB.
fn round_mib(bytes: u64) -> u64 {
    (bytes + MIB / 2) / MIB
}
