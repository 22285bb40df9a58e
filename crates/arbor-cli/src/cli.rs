use std::net::SocketAddr;
use std::path::PathBuf;

use arbor_types::{CheckpointId, SessionId};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "Arbor: branching conversation history",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML config file (defaults apply when omitted)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the checkpoint log; overrides the config file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// List sessions that have checkpoints
    Sessions,
    /// Show a session's checkpoints in creation order
    Log(LogArgs),
    /// Show a session's checkpoint tree
    Tree(TreeArgs),
    /// Show the sibling forks of a checkpoint
    Branches(BranchesArgs),
    /// Show how two checkpoints diverge
    Diff(DiffArgs),
    /// Append a checkpoint (one completed turn)
    Record(RecordArgs),
    /// Merge two forks into a new session
    Merge(MergeArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct LogArgs {
    pub session: SessionId,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args)]
pub struct TreeArgs {
    pub session: SessionId,
}

#[derive(Args)]
pub struct BranchesArgs {
    pub checkpoint: CheckpointId,
}

#[derive(Args)]
pub struct DiffArgs {
    pub a: CheckpointId,
    pub b: CheckpointId,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Session to append to; a new session is started when omitted
    #[arg(long)]
    pub session: Option<SessionId>,
    /// Parent checkpoint; omitted for a session root
    #[arg(long)]
    pub parent: Option<CheckpointId>,
    #[arg(long)]
    pub system: Option<String>,
    #[arg(short, long)]
    pub user: String,
    #[arg(short, long)]
    pub assistant: Option<String>,
    /// Metadata entry as key=value (repeatable)
    #[arg(long = "meta", value_parser = parse_meta)]
    pub metadata: Vec<(String, String)>,
}

#[derive(Args)]
pub struct MergeArgs {
    pub session: SessionId,
    pub a: CheckpointId,
    pub b: CheckpointId,
    #[arg(short, long)]
    pub instruction: Option<String>,
}

pub fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}
