//! pipeline-notify - post or update chat messages for one pipeline activity.
//!
//! Reads the bot configuration, the triggering activity and (optionally) the
//! activity history of the repository, then runs the pipeline flow, the
//! review flow, or both.
//!
//! # Environment Variables
//!
//! - `SLACK_BOT_TOKEN` - Slack bot token (required to send anything)
//! - `SLACK_API_URL` - Slack Web API base URL override
//! - `GITHUB_TOKEN` - token for pull request lookups
//! - `GITHUB_API_URL` - GitHub REST API base URL override
//! - `RUST_LOG` - log filter (default `info`)
//!
//! # Examples
//!
//! ```bash
//! # Pipeline message only, references kept in state.json
//! pipeline-notify --config notify.yaml --activity run.json --state state.json pipeline
//!
//! # Both flows, with the other runs of the pull request
//! pipeline-notify --config notify.yaml --activity run.json --history runs.json all
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pipeline_notify::{
    ActivityRecord, BotConfig, Collaborators, GitHubPullRequests, InMemoryActivities,
    InMemoryReferenceStore, JsonFileReferenceStore, Notifier, ReferenceStore, SlackSink,
    StaticIdentityResolver,
};
use tracing::{info, warn};

/// Post or update chat messages for a pipeline activity.
#[derive(Parser)]
#[command(name = "pipeline-notify")]
#[command(about = "Reconcile chat notifications with CI pipeline activity")]
#[command(version)]
struct Cli {
    /// Bot configuration (YAML)
    #[arg(long, env = "PIPELINE_NOTIFY_CONFIG")]
    config: PathBuf,

    /// Triggering activity (JSON)
    #[arg(long)]
    activity: PathBuf,

    /// Known activities of the repository (JSON array)
    #[arg(long)]
    history: Option<PathBuf>,

    /// Message reference file; kept in memory for this run when omitted
    #[arg(long, env = "PIPELINE_NOTIFY_STATE")]
    state: Option<PathBuf>,

    /// Which flow to run
    #[arg(value_enum)]
    flow: FlowArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlowArg {
    /// Pipeline message
    Pipeline,
    /// Pull request review message
    Review,
    /// Both
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = BotConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    let activity: ActivityRecord = read_json(&cli.activity)?;

    let mut history: Vec<ActivityRecord> = match &cli.history {
        Some(path) => read_json(path)?,
        None => vec![],
    };
    if !history.iter().any(|record| record.name == activity.name) {
        history.push(activity.clone());
    }

    let store: Arc<dyn ReferenceStore> = match &cli.state {
        Some(path) => {
            let store = JsonFileReferenceStore::open(path)
                .await
                .with_context(|| format!("Failed to open state file {}", path.display()))?;
            info!(path = %store.path().display(), "Using message reference file");
            Arc::new(store)
        }
        None => {
            warn!("No --state given, message references will not outlive this run");
            Arc::new(InMemoryReferenceStore::new())
        }
    };

    let sink = SlackSink::from_env();
    if !sink.enabled() {
        warn!("SLACK_BOT_TOKEN not set, every send will fail");
    }

    let notifier = Notifier::new(
        config.clone(),
        Collaborators {
            activities: Arc::new(InMemoryActivities::new(history)),
            pull_requests: Arc::new(
                GitHubPullRequests::from_env().context("Failed to create GitHub client")?,
            ),
            identities: Arc::new(StaticIdentityResolver::new(config.users)),
            sink: Arc::new(sink),
            store,
        },
    );

    info!(activity = %activity.name, "Processing activity");

    match cli.flow {
        FlowArg::Pipeline => notifier
            .handle_pipeline_event(&activity)
            .await
            .context("Pipeline notification failed")?,
        FlowArg::Review => notifier
            .handle_review_event(&activity)
            .await
            .context("Review notification failed")?,
        FlowArg::All => notifier
            .handle_event(&activity)
            .await
            .context("Notification failed")?,
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
