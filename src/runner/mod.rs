//! Container sandbox plumbing.
//!
//! This module owns everything that talks to the container runtime: building
//! and supervising per-job containers ([`exec`]), naming them ([`names`]),
//! and sampling aggregate resource usage ([`stats`]). Interpreting what runs
//! inside the containers is [`crate::tester`]'s job.

pub mod exec;
pub mod names;
pub mod stats;

pub use exec::{ContainerSpec, DockerDriver, LogStream, LogTail, Sandbox, SandboxDriver};
pub use stats::{ResourceProbe, ResourceSample};
