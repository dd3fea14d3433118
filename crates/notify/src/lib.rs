//! Chat notifications for CI pipeline runs and the pull requests that
//! trigger them.
//!
//! Every pipeline run produces a pipeline message, and every pull request a
//! single review message that is kept up to date across rebuilds. Messages
//! are reconciled rather than appended: a stored reference maps each logical
//! message to the chat platform's coordinates, so a later event edits the
//! message it belongs to instead of posting a new one.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pipeline_notify::{
//!     BotConfig, Collaborators, GitHubPullRequests, InMemoryActivities,
//!     InMemoryReferenceStore, Notifier, SlackSink, StaticIdentityResolver,
//! };
//!
//! # async fn run(activity: pipeline_notify::ActivityRecord) -> anyhow::Result<()> {
//! let config = BotConfig::load(std::path::Path::new("notify.yaml"))?;
//! let notifier = Notifier::new(
//!     config.clone(),
//!     Collaborators {
//!         activities: Arc::new(InMemoryActivities::new(vec![])),
//!         pull_requests: Arc::new(GitHubPullRequests::from_env()?),
//!         identities: Arc::new(StaticIdentityResolver::new(config.users.clone())),
//!         sink: Arc::new(SlackSink::from_env()),
//!         store: Arc::new(InMemoryReferenceStore::new()),
//!     },
//! );
//!
//! // Pipeline message, then review message
//! notifier.handle_event(&activity).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Rules come from a YAML file (see [`BotConfig`]). Credentials come from
//! the environment:
//!
//! - `SLACK_BOT_TOKEN`: Slack bot token (enables the Slack sink)
//! - `SLACK_API_URL`: Slack Web API base URL override
//! - `GITHUB_TOKEN`: token for pull request lookups
//! - `GITHUB_API_URL`: GitHub REST API base URL override
//!
//! # Architecture
//!
//! - [`status`] resolves review and build statuses from labels and states
//! - [`eligibility`] decides whether a rule applies to an activity
//! - [`thread`] groups the runs of one pull request under an anchor run
//! - [`render`] turns resolved data into a [`Message`]
//! - [`store`] remembers where each logical message lives
//! - [`Notifier`] drives the flows through [`MessageSink`] and the providers

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod message;
pub mod model;
pub mod notifier;
pub mod providers;
pub mod render;
pub mod status;
pub mod store;
pub mod thread;

pub use channels::{MessageSink, SlackSink};
pub use config::{BotConfig, Rule};
pub use error::{
    ConfigError, NotifyError, ProviderError, RuleError, RuleFailure, SinkError, StoreError,
};
pub use message::Message;
pub use model::{
    ActivityRecord, ChatIdentity, Flow, PipelineState, PullRequestInfo, Stage, VcsUser,
};
pub use notifier::{Collaborators, Notifier};
pub use providers::{
    ActivityAnnotator, ActivityProvider, GitHubPullRequests, IdentityResolver,
    InMemoryActivities, PullRequestProvider, StaticIdentityResolver,
};
pub use status::{Status, StatusKind, StatusPolicy};
pub use store::{
    InMemoryReferenceStore, JsonFileReferenceStore, MessageKey, MessageReference, ReferenceStore,
};
