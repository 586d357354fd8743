use err_derive::Error;

/// Everything that can fail a single job. The `Display` text is exactly
/// what the dispatcher receives in `taskError.error`.
///
/// None of these are fatal to the process: a failed job is reported and the
/// agent keeps serving the link.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The job's language tag keys nothing in the registry. Raised before
    /// any I/O happens for the job.
    #[error(display = "Unsupported language: {}", _0)]
    UnsupportedLanguage(String),

    /// Workspace directory creation or file write failed.
    #[error(display = "Workspace error: {}", _0)]
    Workspace(#[error(source)] std::io::Error),

    /// Compile container exited non-zero; carries the buffered log tail.
    #[error(display = "Compilation failed: {}", _0)]
    Compile(String),

    /// The wall-clock timer fired before a `final_result` was parsed.
    #[error(display = "Execution timeout")]
    Timeout,

    /// Run container exited non-zero.
    #[error(display = "Container exited with code {}", _0)]
    ContainerExit(i64),

    /// Run container exited cleanly but never produced a `final_result`.
    #[error(display = "No test results received")]
    NoResult,

    /// The container runtime refused to create or start a container.
    #[error(display = "Sandbox error: {}", _0)]
    Sandbox(anyhow::Error),
}
