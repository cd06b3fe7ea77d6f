//! CLI definition using clap derive.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "invigil", about = "timed-exam attempt client")]
pub struct Cli {
    /// UDS socket path of the attempt service
    /// (default: $XDG_RUNTIME_DIR/invigil/invigild.sock)
    #[arg(long, short = 's', global = true, env = "INVIGIL_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Open a tab session for an attempt (countdown + tab election)
    Run(RunOpts),
    /// One-shot attempt status query (JSON)
    Status(StatusOpts),
    /// Start a development attempt-service stub
    Stub(StubOpts),
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// Attempt identifier
    #[arg(long)]
    pub attempt: String,

    /// Shared-store directory (default: $XDG_RUNTIME_DIR/invigil/store)
    #[arg(long)]
    pub store_dir: Option<String>,

    /// Master heartbeat interval in milliseconds
    #[arg(long, default_value = "2000")]
    pub heartbeat_ms: u64,

    /// Server sync cadence in seconds
    #[arg(long, default_value = "30")]
    pub sync_secs: u64,

    /// Drift correction threshold in seconds
    #[arg(long, default_value = "15")]
    pub drift_secs: u64,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    /// Attempt identifier
    #[arg(long)]
    pub attempt: String,
}

#[derive(clap::Args, Clone)]
pub struct StubOpts {
    /// Attempt identifier served by the stub
    #[arg(long, default_value = "demo")]
    pub attempt: String,

    /// Attempt duration in seconds
    #[arg(long, default_value = "300")]
    pub duration_secs: i64,

    /// Artificial skew added to the stub's clock in milliseconds
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub skew_ms: i64,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/invigil/invigild.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/invigil-{user}/invigild.sock")
}
