use clap::Parser;
use std::path::PathBuf;

/// Long-lived execution agent: receives code-evaluation jobs from the
/// dispatcher and runs them in resource-limited containers.
#[derive(Parser, Debug, Clone)]
#[command(name = "exec-agent", version, about)]
pub struct Opts {
    /// WebSocket endpoint of the dispatcher, e.g. `ws://localhost:5000/agent`.
    #[arg(long, env = "DISPATCHER_URL")]
    pub dispatcher_url: String,

    /// Parent directory for per-job scratch workspaces.
    #[arg(long, env = "WORKSPACE_ROOT", default_value = "./temp")]
    pub workspace_root: PathBuf,

    /// Delay between reconnect attempts, in milliseconds.
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 1000)]
    pub reconnect_delay_ms: u64,

    /// JSON file replacing the built-in language table.
    #[arg(long, env = "LANGUAGES_FILE")]
    pub languages: Option<PathBuf>,
}
