//! Notification orchestrator: runs the pipeline and review flows for one
//! incoming activity.
//!
//! Every configured rule is evaluated independently. A rule that fails is
//! recorded and the remaining rules still run; only a malformed activity
//! aborts the whole call, and it does so before anything is sent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::channels::MessageSink;
use crate::config::{BotConfig, Rule};
use crate::eligibility::{check, check_repo, Eligibility};
use crate::error::{NotifyError, ProviderError, RuleError, RuleFailure, SinkError};
use crate::model::{ActivityRecord, ChatIdentity, Flow, PullRequestInfo, VcsUser};
use crate::providers::{ActivityAnnotator, ActivityProvider, IdentityResolver, PullRequestProvider};
use crate::render::{mention_or_link, pipeline_message, review_message, Rendered, ReviewView};
use crate::status::{build_status, review_status};
use crate::store::{KeyLocks, MessageKey, MessageReference, ReferenceStore};
use crate::thread::find_thread;

/// Prefix of the annotation keys written back onto activities.
const ANNOTATION_PREFIX: &str = "pipeline-notify.slack";

/// The services the orchestrator talks to.
pub struct Collaborators {
    pub activities: Arc<dyn ActivityProvider>,
    pub pull_requests: Arc<dyn PullRequestProvider>,
    pub identities: Arc<dyn IdentityResolver>,
    pub sink: Arc<dyn MessageSink>,
    pub store: Arc<dyn ReferenceStore>,
}

/// Where a message goes.
#[derive(Debug, Clone, Copy)]
enum Destination<'a> {
    /// A named channel, `#` included
    Channel(&'a str),
    /// A direct conversation with a chat user
    Direct(&'a str),
}

impl Destination<'_> {
    /// Logical name the reference store is keyed by.
    fn name(&self) -> &str {
        match self {
            Self::Channel(name) | Self::Direct(name) => name,
        }
    }
}

/// Pull request metadata for the event. Fetched at most once; a failed
/// fetch is kept too and fails every rule that needs it.
type PullRequestCell = OnceCell<Result<Option<PullRequestInfo>, ProviderError>>;

/// Reconciles chat messages with pipeline activity.
pub struct Notifier {
    config: BotConfig,
    activities: Arc<dyn ActivityProvider>,
    pull_requests: Arc<dyn PullRequestProvider>,
    identities: Arc<dyn IdentityResolver>,
    sink: Arc<dyn MessageSink>,
    store: Arc<dyn ReferenceStore>,
    annotator: Option<Arc<dyn ActivityAnnotator>>,
    locks: KeyLocks,
    call_timeout: Duration,
}

impl Notifier {
    #[must_use]
    pub fn new(config: BotConfig, collaborators: Collaborators) -> Self {
        let call_timeout = config.call_timeout();
        Self {
            config,
            activities: collaborators.activities,
            pull_requests: collaborators.pull_requests,
            identities: collaborators.identities,
            sink: collaborators.sink,
            store: collaborators.store,
            annotator: None,
            locks: KeyLocks::new(),
            call_timeout,
        }
    }

    /// Record message coordinates on the activity after each new message.
    #[must_use]
    pub fn with_annotator(mut self, annotator: Arc<dyn ActivityAnnotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Post or update the pipeline message for `activity` under every
    /// pipeline rule.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Configuration`] for a malformed activity, or
    /// [`NotifyError::RulesFailed`] listing every rule that failed.
    pub async fn handle_pipeline_event(
        &self,
        activity: &ActivityRecord,
    ) -> Result<(), NotifyError> {
        validate(activity)?;
        let number = activity.pull_request_number()?;
        let pull_request = PullRequestCell::new();

        let mut failures = vec![];
        for (index, rule) in self.config.pipelines.iter().enumerate() {
            if let Err(error) = self
                .pipeline_rule(rule, activity, number, &pull_request)
                .await
            {
                warn!(
                    activity = %activity.name,
                    rule = index,
                    error = %error,
                    "Pipeline rule failed"
                );
                failures.push(RuleFailure {
                    flow: Flow::Pipeline,
                    rule: index,
                    error,
                });
            }
        }
        finish(failures)
    }

    /// Post or update the review message for the pull request `activity`
    /// belongs to, under every review rule. Activities that are not pull
    /// request builds are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Configuration`] for a malformed activity, or
    /// [`NotifyError::RulesFailed`] listing every rule that failed. A build
    /// identifier that is not a number is only an error once a rule applies.
    pub async fn handle_review_event(
        &self,
        activity: &ActivityRecord,
    ) -> Result<(), NotifyError> {
        validate(activity)?;
        let Some(number) = activity.pull_request_number()? else {
            debug!(
                activity = %activity.name,
                branch = %activity.branch,
                "Not a pull request build, skipping review flow"
            );
            return Ok(());
        };
        let pull_request = PullRequestCell::new();

        let mut failures = vec![];
        for (index, rule) in self.config.pull_requests.iter().enumerate() {
            if !self.eligible(rule, activity, None) {
                continue;
            }
            let build = trigger_build(activity)?;
            if let Err(error) = self
                .review_rule(rule, activity, number, build, &pull_request)
                .await
            {
                warn!(
                    activity = %activity.name,
                    rule = index,
                    error = %error,
                    "Review rule failed"
                );
                failures.push(RuleFailure {
                    flow: Flow::Review,
                    rule: index,
                    error,
                });
            }
        }
        finish(failures)
    }

    /// Run the pipeline flow and then the review flow for `activity`.
    ///
    /// The review flow runs even when the pipeline flow failed. Rule failures
    /// of both flows are reported together.
    ///
    /// # Errors
    ///
    /// Returns a [`NotifyError::Configuration`] from either flow, otherwise
    /// [`NotifyError::RulesFailed`] with the failures of both.
    pub async fn handle_event(&self, activity: &ActivityRecord) -> Result<(), NotifyError> {
        let pipeline = self.handle_pipeline_event(activity).await;
        let review = self.handle_review_event(activity).await;
        match (pipeline, review) {
            (Err(NotifyError::RulesFailed(mut failures)), Err(NotifyError::RulesFailed(more))) => {
                failures.extend(more);
                Err(NotifyError::RulesFailed(failures))
            }
            (Err(error @ NotifyError::Configuration(_)), _)
            | (_, Err(error @ NotifyError::Configuration(_))) => Err(error),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn pipeline_rule(
        &self,
        rule: &Rule,
        activity: &ActivityRecord,
        number: Option<u64>,
        pull_request: &PullRequestCell,
    ) -> Result<(), RuleError> {
        if !self.eligible(rule, activity, None) {
            return Ok(());
        }
        let pr = match number {
            Some(number) => self.pull_request(pull_request, activity, number).await?,
            None => None,
        };
        if pr.is_some() && !self.eligible(rule, activity, pr) {
            return Ok(());
        }

        let policy = rule.policy(&self.config.statuses);
        let rendered = pipeline_message(activity, number, pr, &policy, Utc::now());

        if let Some(channel) = rule.channel_name() {
            self.post(
                Destination::Channel(&channel),
                &activity.name,
                Flow::Pipeline,
                activity,
                &rendered,
            )
            .await?;
        }
        if rule.direct_message {
            if let Some(pr) = pr {
                if let Some(author) = self.resolve(&pr.author, activity).await? {
                    self.post(
                        Destination::Direct(&author.user_id),
                        &activity.name,
                        Flow::Pipeline,
                        activity,
                        &rendered,
                    )
                    .await?;
                } else {
                    debug!(
                        activity = %activity.name,
                        login = %pr.author.login,
                        "Author has no chat identity, no direct message"
                    );
                }
            }
        }
        Ok(())
    }

    async fn review_rule(
        &self,
        rule: &Rule,
        activity: &ActivityRecord,
        number: u64,
        build: u64,
        pull_request: &PullRequestCell,
    ) -> Result<(), RuleError> {
        let Some(pr) = self.pull_request(pull_request, activity, number).await? else {
            warn!(activity = %activity.name, number, "Pull request not found, no review message");
            return Ok(());
        };
        if !self.eligible(rule, activity, Some(pr)) {
            return Ok(());
        }

        let thread = self
            .timed(
                find_thread(self.activities.as_ref(), activity, build, number),
                ProviderError::Timeout,
            )
            .await
            .map_err(|source| RuleError::Provider {
                provider: "activity",
                activity: activity.name.clone(),
                source,
            })?;
        if thread.is_stale(build) {
            info!(
                activity = %activity.name,
                build,
                latest = thread.latest_build(),
                "Dropping stale update"
            );
            return Ok(());
        }

        let policy = rule.policy(&self.config.statuses);
        let lgtm_repo = self.config.is_lgtm_repo(&activity.owner, &activity.repo);
        let review = review_status(pr, lgtm_repo, &policy);
        let build_state = build_status(Some(pr), activity.status, &policy);

        let author_identity = self.resolve(&pr.author, activity).await?;
        let author = mention_or_link(&pr.author, author_identity.as_ref());

        let mut reviewers = vec![];
        let mut reviewer_identities = vec![];
        if rule.notify_reviewers {
            for reviewer in &pr.requested_reviewers {
                let identity = self.resolve(reviewer, activity).await?;
                reviewers.push(mention_or_link(reviewer, identity.as_ref()));
                reviewer_identities.extend(identity);
            }
        }

        let rendered = review_message(&ReviewView {
            activity,
            pull_request: pr,
            author: &author,
            reviewers: &reviewers,
            review_status: &review,
            build_status: &build_state,
        });

        if let Some(channel) = rule.channel_name() {
            self.post(
                Destination::Channel(&channel),
                &thread.key,
                Flow::Review,
                &thread.anchor,
                &rendered,
            )
            .await?;
        }
        if rule.direct_message {
            for reviewer in &reviewer_identities {
                self.post(
                    Destination::Direct(&reviewer.user_id),
                    &thread.key,
                    Flow::Review,
                    &thread.anchor,
                    &rendered,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Run the eligibility gate for one rule and log why it did not pass.
    fn eligible(
        &self,
        rule: &Rule,
        activity: &ActivityRecord,
        pull_request: Option<&PullRequestInfo>,
    ) -> bool {
        let eligibility = match pull_request {
            Some(pr) => check(activity, &rule.orgs, &rule.ignore_labels, Some(pr)),
            None => check_repo(activity, &rule.orgs),
        };
        match eligibility {
            Eligibility::Eligible => true,
            Eligibility::NotAllowed => {
                debug!(
                    activity = %activity.name,
                    owner = %activity.owner,
                    repo = %activity.repo,
                    "Repository not allowed by rule"
                );
                false
            }
            Eligibility::IgnoredLabels(labels) => {
                info!(
                    activity = %activity.name,
                    labels = ?labels,
                    "Pull request carries ignored labels"
                );
                false
            }
        }
    }

    /// Fetch the pull request once per event. A missing pull request is
    /// `None`.
    async fn pull_request<'c>(
        &self,
        cell: &'c PullRequestCell,
        activity: &ActivityRecord,
        number: u64,
    ) -> Result<Option<&'c PullRequestInfo>, RuleError> {
        let fetched = cell
            .get_or_init(|| async {
                let fetched = self
                    .timed(
                        self.pull_requests
                            .get_pull_request(&activity.owner, &activity.repo, number),
                        ProviderError::Timeout,
                    )
                    .await;
                match fetched {
                    Err(ProviderError::NotFound(what)) => {
                        warn!(activity = %activity.name, missing = %what, "Pull request not found");
                        Ok(None)
                    }
                    other => other.map(Some),
                }
            })
            .await;
        match fetched {
            Ok(pr) => Ok(pr.as_ref()),
            Err(source) => Err(RuleError::Provider {
                provider: "pull request",
                activity: activity.name.clone(),
                source: source.clone(),
            }),
        }
    }

    async fn resolve(
        &self,
        user: &VcsUser,
        activity: &ActivityRecord,
    ) -> Result<Option<ChatIdentity>, RuleError> {
        self.timed(self.identities.resolve(user), ProviderError::Timeout)
            .await
            .map_err(|source| RuleError::Provider {
                provider: "identity",
                activity: activity.name.clone(),
                source,
            })
    }

    /// Create or update one logical message.
    ///
    /// The per-key lock is held from lookup to record, and the store only
    /// changes after the sink confirmed the send.
    async fn post(
        &self,
        destination: Destination<'_>,
        key: &str,
        flow: Flow,
        activity: &ActivityRecord,
        rendered: &Rendered,
    ) -> Result<(), RuleError> {
        let message_key = MessageKey::new(flow, destination.name(), key);
        let sink_error = |source| RuleError::Sink {
            destination: message_key.destination.clone(),
            source,
        };
        let store_error = |source| RuleError::Store {
            destination: message_key.destination.clone(),
            source,
        };

        let _guard = self.locks.lock(&message_key).await;
        let existing = self.store.lookup(&message_key).await.map_err(store_error)?;

        match existing {
            Some(reference) => {
                self.timed(
                    self.sink.update(&reference, &rendered.message),
                    SinkError::Timeout,
                )
                .await
                .map_err(sink_error)?;
                info!(
                    sink = self.sink.name(),
                    destination = %message_key.destination,
                    key = %message_key.key,
                    ts = %reference.timestamp,
                    "Updated message"
                );
            }
            None if rendered.create_if_missing => {
                let target = match destination {
                    Destination::Channel(channel) => channel.to_string(),
                    Destination::Direct(user_id) => self
                        .timed(
                            self.sink.open_direct_conversation(user_id),
                            SinkError::Timeout,
                        )
                        .await
                        .map_err(sink_error)?,
                };
                let reference = self
                    .timed(self.sink.send(&target, &rendered.message), SinkError::Timeout)
                    .await
                    .map_err(sink_error)?;
                info!(
                    sink = self.sink.name(),
                    destination = %message_key.destination,
                    key = %message_key.key,
                    ts = %reference.timestamp,
                    "Created message"
                );
                self.store
                    .record(message_key.clone(), reference.clone())
                    .await
                    .map_err(store_error)?;
                self.annotate(activity, flow, destination, &reference).await;
            }
            None => {
                info!(
                    destination = %message_key.destination,
                    key = %message_key.key,
                    "No existing message and creation not allowed, skipping"
                );
            }
        }
        Ok(())
    }

    async fn annotate(
        &self,
        activity: &ActivityRecord,
        flow: Flow,
        destination: Destination<'_>,
        reference: &MessageReference,
    ) {
        let Some(annotator) = &self.annotator else {
            return;
        };
        let key = annotation_key(flow, destination.name());
        let value = format!("{}/{}", reference.channel_id, reference.timestamp);
        let result = self
            .timed(annotator.annotate(activity, &key, &value), ProviderError::Timeout)
            .await;
        if let Err(e) = result {
            warn!(activity = %activity.name, key = %key, error = %e, "Failed to annotate activity");
        }
    }

    /// Bound a collaborator call by the configured timeout.
    async fn timed<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>>,
        timed_out: fn(Duration) -> E,
    ) -> Result<T, E> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(timed_out(self.call_timeout)))
    }
}

fn validate(activity: &ActivityRecord) -> Result<(), NotifyError> {
    if activity.name.is_empty() {
        return Err(NotifyError::Configuration(format!(
            "activity for {}/{} on branch {} has no name",
            activity.owner, activity.repo, activity.branch
        )));
    }
    Ok(())
}

/// Build number of the triggering run, needed to order it within its thread.
fn trigger_build(activity: &ActivityRecord) -> Result<u64, NotifyError> {
    activity.build_number().ok_or_else(|| {
        NotifyError::Configuration(format!(
            "build identifier {:?} of activity {} is not a number",
            activity.build_identifier, activity.name
        ))
    })
}

fn annotation_key(flow: Flow, destination: &str) -> String {
    format!(
        "{ANNOTATION_PREFIX}-{flow}/{}",
        destination.trim_start_matches('#')
    )
}

fn finish(failures: Vec<RuleFailure>) -> Result<(), NotifyError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(NotifyError::RulesFailed(failures))
    }
}
