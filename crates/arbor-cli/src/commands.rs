use std::sync::Arc;

use anyhow::{bail, Context};
use arbor_diff::{CheckpointDiff, DiffEngine};
use arbor_merge::{
    InMemorySessionService, JuxtaposeEngine, MergeCoordinator, MergeEvent, MergeRequest,
};
use arbor_server::{ArborServer, ServerConfig};
use arbor_store::{CheckpointStore, LogCheckpointStore};
use arbor_tree::{BranchResolver, SessionTree, TreeBuilder};
use arbor_types::{Checkpoint, CheckpointSummary, Message, Metadata, SessionId};
use colored::Colorize;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args).await,
        Command::Sessions => cmd_sessions(&open_store(&config)?, format),
        Command::Log(args) => cmd_log(&open_store(&config)?, args, format),
        Command::Tree(args) => cmd_tree(&open_store(&config)?, args, format),
        Command::Branches(args) => cmd_branches(&open_store(&config)?, args, format),
        Command::Diff(args) => cmd_diff(&open_store(&config)?, args, format),
        Command::Record(args) => cmd_record(&open_store(&config)?, args, format),
        Command::Merge(args) => cmd_merge(open_store(&config)?, &config, args, format).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn open_store(config: &ServerConfig) -> anyhow::Result<LogCheckpointStore> {
    let path = config.log_path();
    debug!(path = %path.display(), "opening checkpoint log");
    LogCheckpointStore::open(&path, config.store.clone())
        .with_context(|| format!("opening checkpoint log {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    println!("Arbor server on {} (data: {})", config.bind_addr.to_string().bold(), config.data_dir.display());
    ArborServer::open(config)?.serve().await?;
    Ok(())
}

fn cmd_sessions(store: &LogCheckpointStore, format: OutputFormat) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for session in store.sessions()? {
        rows.push((session, store.list_by_session(&session)?.len()));
    }
    rows.sort();

    if format == OutputFormat::Json {
        let listing: Vec<_> = rows
            .iter()
            .map(|(id, count)| serde_json::json!({ "session_id": id, "checkpoint_count": count }))
            .collect();
        return print_json(&listing);
    }
    if rows.is_empty() {
        println!("No sessions.");
    }
    for (id, count) in rows {
        println!("{}  {} checkpoints", id.to_string().cyan(), count);
    }
    Ok(())
}

fn cmd_log(store: &LogCheckpointStore, args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut checkpoints = store.list_by_session(&args.session)?;
    checkpoints.sort_by_key(Checkpoint::order_key);
    let skip = checkpoints.len().saturating_sub(args.limit);
    let shown: Vec<CheckpointSummary> = checkpoints[skip..].iter().map(Checkpoint::summary).collect();

    if format == OutputFormat::Json {
        return print_json(&shown);
    }
    if shown.is_empty() {
        println!("No checkpoints in session {}.", args.session.short_id().cyan());
    }
    for summary in &shown {
        if args.oneline {
            println!("{} {}", summary.id.short_id().yellow(), summary.preview);
            continue;
        }
        let parent = summary.parent_id.map(|p| p.short_id()).unwrap_or_else(|| "root".into());
        println!("{}  {}  (parent {})", summary.id.to_string().yellow().bold(), summary.created_at.to_string().dimmed(), parent);
        println!("  {} messages | {}", summary.message_count, summary.preview);
    }
    Ok(())
}

fn cmd_tree(store: &LogCheckpointStore, args: TreeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tree = TreeBuilder::new(store).build_tree(&args.session)?;
    if format == OutputFormat::Json {
        return print_json(&tree);
    }
    if tree.is_empty() {
        println!("No checkpoints in session {}.", args.session.short_id().cyan());
    }
    for line in render_tree(&tree) {
        println!("{line}");
    }
    Ok(())
}

/// One line per node in pre-order, indented by depth; fork points are
/// marked with their child count.
fn render_tree(tree: &SessionTree) -> Vec<String> {
    tree.nodes
        .iter()
        .map(|node| {
            let indent = "  ".repeat(node.depth);
            let fork = if node.child_count > 1 {
                format!(" [{} forks]", node.child_count).magenta().to_string()
            } else {
                String::new()
            };
            format!("{indent}{} {}{fork}", node.summary.id.short_id().yellow(), node.summary.preview)
        })
        .collect()
}

fn cmd_branches(store: &LogCheckpointStore, args: BranchesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let view = BranchResolver::new(store).list_branches(&args.checkpoint)?;
    if format == OutputFormat::Json {
        return print_json(&view);
    }
    println!("Branch {} of {}", view.current_index + 1, view.total);
    for (i, sibling) in view.siblings.iter().enumerate() {
        let marker = if i == view.current_index { "*".green().bold() } else { " ".normal() };
        println!("{marker} {} {}", sibling.id.short_id().yellow(), sibling.preview);
    }
    Ok(())
}

fn cmd_diff(store: &LogCheckpointStore, args: DiffArgs, format: OutputFormat) -> anyhow::Result<()> {
    let diff = DiffEngine::new(store).diff(&args.a, &args.b)?;
    if format == OutputFormat::Json {
        return print_json(&diff);
    }
    for line in render_diff(&diff) {
        println!("{line}");
    }
    Ok(())
}

fn render_diff(diff: &CheckpointDiff) -> Vec<String> {
    let mut lines = vec![format!(
        "common ancestor {} ({} shared messages)",
        diff.lca.id.short_id().yellow(),
        diff.common_prefix.len()
    )];
    if diff.is_identical() {
        lines.push("Checkpoints are identical.".into());
        return lines;
    }
    let mut side = |label: &str, messages: &[Message], sign: &str| {
        lines.push(format!("{label} ({} messages)", messages.len()).bold().to_string());
        for message in messages {
            let text = format!("{sign} [{}] {}", message.role, message.content);
            lines.push(if sign == "-" { text.red().to_string() } else { text.green().to_string() });
        }
    };
    side("branch A", &diff.unique_a, "-");
    side("branch B", &diff.unique_b, "+");
    lines
}

fn cmd_record(store: &LogCheckpointStore, args: RecordArgs, format: OutputFormat) -> anyhow::Result<()> {
    let session = match (args.session, args.parent) {
        (Some(session), _) => session,
        (None, Some(parent)) => store.get(&parent)?.session_id,
        (None, None) => SessionId::new(),
    };

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(args.user));
    if let Some(assistant) = args.assistant {
        messages.push(Message::assistant(assistant));
    }
    let metadata: Metadata = args.metadata.into_iter().collect();

    let checkpoint = store.append(session, args.parent, messages, metadata)?;
    store.flush()?;

    if format == OutputFormat::Json {
        return print_json(&checkpoint.summary());
    }
    println!("{} Recorded checkpoint {}", "✓".green().bold(), checkpoint.id.to_string().yellow());
    println!("  Session: {}", checkpoint.session_id.to_string().cyan());
    Ok(())
}

async fn cmd_merge(
    store: LogCheckpointStore,
    config: &ServerConfig,
    args: MergeArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let store = Arc::new(store);
    let coordinator = MergeCoordinator::new(
        store.clone(),
        Arc::new(JuxtaposeEngine),
        Arc::new(InMemorySessionService::new()),
        config.merge.clone(),
    );
    let request = MergeRequest {
        session_id: args.session,
        checkpoint_a: args.a,
        checkpoint_b: args.b,
        instruction: args.instruction,
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut handle = coordinator.merge(request, cancel)?;
    let mut failure = None;
    while let Some(event) = handle.events.next().await {
        match (&event, format) {
            (_, OutputFormat::Json) => println!("{}", serde_json::to_string(&event)?),
            (MergeEvent::Chunk { content }, OutputFormat::Text) => print!("{content}"),
            (MergeEvent::End { new_session_id, root_checkpoint_id }, OutputFormat::Text) => {
                println!();
                println!("{} Merged into session {}", "✓".green().bold(), new_session_id.to_string().cyan());
                println!("  Root checkpoint: {}", root_checkpoint_id.to_string().yellow());
            }
            (MergeEvent::Error { .. }, OutputFormat::Text) => {}
        }
        if let MergeEvent::Error { error, .. } = event {
            failure = Some(error);
        }
    }

    let outcome = handle.outcome.await.context("merge task failed")?;
    store.flush()?;
    if let Some(error) = failure {
        bail!("merge failed: {error}");
    }
    outcome?;
    Ok(())
}
