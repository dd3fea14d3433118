//! Rendering of pipeline and review messages.
//!
//! Rendering is a pure function of its inputs: the same activity, pull
//! request, statuses and clock always give the same message.

use chrono::{DateTime, Duration, Utc};

use crate::message::{link, mention, Action, Attachment, Field, Message};
use crate::model::{ActivityRecord, ChatIdentity, PullRequestInfo, Stage, VcsUser};
use crate::status::{attachment_color, step_glyph, ResolvedStatus, StatusPolicy};

/// Stage name whose steps are generated and never shown.
const META_PIPELINE_STAGE: &str = "meta pipeline";

/// First words of step names that belong to the user's pipeline.
const KNOWN_STAGE_TYPES: &[&str] = &[
    "setup",
    "setVersion",
    "preBuild",
    "build",
    "postBuild",
    "promote",
    "pipeline",
];

/// Display names for stage keywords that do not title-case nicely.
const STAGE_ALIASES: &[(&str, &str)] = &[
    ("setversion", "Set Version"),
    ("prebuild", "Pre-Build"),
    ("postbuild", "Post-Build"),
];

const GCS_SCHEME: &str = "gs://";
const GCS_VIEWER: &str = "https://storage.cloud.google.com/";

/// Pipeline messages older than this are only ever updated, never created.
const CREATE_WINDOW_HOURS: i64 = 24;

/// A rendered message and whether it may start a new thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub message: Message,
    pub create_if_missing: bool,
}

/// Render the message for one pipeline run.
///
/// `number` is the pull request number derived from the branch, and
/// `pull_request` the fetched metadata if it could be found. `now` decides
/// whether the run is recent enough to start a new message.
#[must_use]
pub fn pipeline_message(
    activity: &ActivityRecord,
    number: Option<u64>,
    pull_request: Option<&PullRequestInfo>,
    policy: &StatusPolicy,
    now: DateTime<Utc>,
) -> Rendered {
    let mut title = format!(
        "{} {}",
        pipeline_name(activity, number),
        repository_name(activity)
    );
    if let Some(number) = number {
        let pr_link = pull_request.map_or_else(
            || format!("#{number}"),
            |pr| link(&pull_request_name(&pr.url), &pr.url),
        );
        title.push(' ');
        title.push_str(&pr_link);
    }
    title.push_str(&format!(" (Build {})", build_link(activity)));

    let mut actions = vec![];
    let mut fallback = vec![];
    if !activity.git_url.is_empty() {
        fallback.push(format!("Repo: {}", activity.git_url));
        actions.push(Action::button("Repository", &activity.git_url));
    }
    if !activity.link_url.is_empty() {
        fallback.push(format!("Build: {}", activity.link_url));
        actions.push(Action::button("Pipeline", &activity.link_url));
    }
    if !activity.log_url.is_empty() {
        fallback.push(format!("Logs: {}", activity.log_url));
        actions.push(Action::button("Build Logs", &log_viewer_url(&activity.log_url)));
    }

    let last_updated = activity.last_updated(pull_request);
    let header = Attachment {
        callback_id: format!("pipelineactivity:{}", activity.name),
        color: attachment_color(activity.effective_status()).to_string(),
        title,
        fallback: fallback.join(", "),
        actions,
        ts: epoch(last_updated),
        ..Attachment::default()
    };

    let mut attachments = vec![header];
    for stage in &activity.stages {
        attachments.extend(stage_attachments(stage, policy));
    }

    let create_if_missing =
        last_updated.is_some_and(|t| t >= now - Duration::hours(CREATE_WINDOW_HOURS));

    Rendered {
        message: Message { attachments },
        create_if_missing,
    }
}

/// Everything the review message shows, already resolved.
#[derive(Debug, Clone, Copy)]
pub struct ReviewView<'a> {
    pub activity: &'a ActivityRecord,
    pub pull_request: &'a PullRequestInfo,
    /// Mention or link for the pull request author
    pub author: &'a str,
    /// Mentions of the requested reviewers; empty when reviewers are not notified
    pub reviewers: &'a [String],
    pub review_status: &'a ResolvedStatus,
    pub build_status: &'a ResolvedStatus,
}

/// Render the review request message for a pull request.
///
/// Merged and closed pull requests may update an existing message but never
/// start a new one.
#[must_use]
pub fn review_message(view: &ReviewView<'_>) -> Rendered {
    let pr = view.pull_request;
    let pr_link = link(
        &format!("Pull Request {} ({})", pull_request_name(&pr.url), pr.title),
        &pr.url,
    );
    let request = format!(
        "review {pr_link} created on {} by {}",
        repository_name(view.activity),
        view.author
    );
    let text = if view.reviewers.is_empty() {
        format!("Please {request}")
    } else {
        format!("{} please {request}", view.reviewers.join(" "))
    };

    let attachment = Attachment {
        callback_id: format!("preview:{}", view.activity.name),
        color: attachment_color(view.activity.effective_status()).to_string(),
        text,
        fields: vec![
            Field {
                title: String::new(),
                value: view.review_status.status.display(),
                short: true,
            },
            Field {
                title: String::new(),
                value: view.build_status.status.display(),
                short: true,
            },
        ],
        ts: epoch(view.activity.last_updated(Some(pr))),
        ..Attachment::default()
    };

    Rendered {
        message: Message {
            attachments: vec![attachment],
        },
        create_if_missing: !view.build_status.kind.is_terminal(),
    }
}

/// Mention a user who has a chat identity, otherwise link or name them.
#[must_use]
pub fn mention_or_link(user: &VcsUser, identity: Option<&ChatIdentity>) -> String {
    if let Some(identity) = identity {
        return mention(&identity.user_id);
    }
    match (&user.name, &user.url) {
        (Some(name), Some(url)) if !name.is_empty() => link(name, url),
        (Some(name), _) if !name.is_empty() => name.clone(),
        _ => user.login.clone(),
    }
}

fn pipeline_name(activity: &ActivityRecord, number: Option<u64>) -> &'static str {
    if activity.is_release() {
        "Release Pipeline"
    } else if number.is_some() {
        "Pull Request Pipeline"
    } else {
        "Pipeline"
    }
}

/// `owner/repo`, each part linked to its page.
fn repository_name(activity: &ActivityRecord) -> String {
    let git_url = activity.git_url.as_str();
    let trimmed = git_url.trim_end_matches('/');
    let owner_url = trimmed
        .rfind('/')
        .filter(|idx| *idx > 0)
        .map_or(trimmed, |idx| &trimmed[..=idx]);
    format!(
        "{}/{}",
        link(&activity.owner, owner_url),
        link(&activity.repo, git_url)
    )
}

/// `#<number>` taken from the last path segment of a pull request URL.
fn pull_request_name(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) if idx > 0 => format!("#{}", &url[idx + 1..]),
        _ => url.to_string(),
    }
}

fn build_link(activity: &ActivityRecord) -> String {
    link(&format!("#{}", activity.build_identifier), &activity.link_url)
}

fn log_viewer_url(log_url: &str) -> String {
    log_url.replace(GCS_SCHEME, GCS_VIEWER)
}

fn epoch(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.map(|t| t.timestamp()).filter(|ts| *ts > 0)
}

fn stage_attachments(stage: &Stage, policy: &StatusPolicy) -> Vec<Attachment> {
    let name = if stage.name.is_empty() {
        "Stage"
    } else {
        stage.name.as_str()
    };
    let mut attachments = vec![step_attachment(stage, name, policy)];
    if stage.name != META_PIPELINE_STAGE {
        attachments.extend(
            stage
                .steps
                .iter()
                .filter(|step| is_user_pipeline_step(&step.name))
                .map(|step| step_attachment(step, &step.name, policy)),
        );
    }
    attachments
}

fn step_attachment(step: &Stage, name: &str, policy: &StatusPolicy) -> Attachment {
    let glyph = step_glyph(step.status, policy);
    let name = friendly_name(name);
    let text = if glyph.is_empty() {
        name
    } else {
        format!("{glyph} {name}")
    };
    Attachment {
        text,
        color: attachment_color(step.status).to_string(),
        mrkdwn_in: vec!["fields".to_string()],
        ..Attachment::default()
    }
}

/// Steps whose first word is a known stage keyword; everything else is
/// generated by the pipeline engine.
fn is_user_pipeline_step(name: &str) -> bool {
    name.split_whitespace().next().is_some_and(|first| {
        KNOWN_STAGE_TYPES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(first))
    })
}

/// Title-case every word, mapping known stage keywords to their display names.
fn friendly_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            STAGE_ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(word))
                .map_or_else(|| capitalize(word), |(_, display)| (*display).to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PipelineState;
    use crate::status::{build_status, review_status};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn activity() -> ActivityRecord {
        ActivityRecord {
            name: "acme-widgets-pr-42-3".to_string(),
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            branch: "pr-42".to_string(),
            build_identifier: "3".to_string(),
            status: PipelineState::Running,
            start_time: Some(now() - Duration::minutes(5)),
            git_url: "https://github.com/acme/widgets".to_string(),
            link_url: "https://ci.acme.io/acme/widgets/pr-42/3".to_string(),
            log_url: "gs://acme-logs/widgets/pr-42/3.log".to_string(),
            ..ActivityRecord::default()
        }
    }

    fn pull_request() -> PullRequestInfo {
        PullRequestInfo {
            number: 42,
            title: "Add sprockets".to_string(),
            url: "https://github.com/acme/widgets/pull/42".to_string(),
            author: VcsUser::new("octocat"),
            ..PullRequestInfo::default()
        }
    }

    #[test]
    fn test_pipeline_title_and_buttons() {
        let pr = pull_request();
        let rendered =
            pipeline_message(&activity(), Some(42), Some(&pr), &StatusPolicy::default(), now());
        let header = &rendered.message.attachments[0];

        assert_eq!(
            header.title,
            "Pull Request Pipeline <https://github.com/acme/|acme>/<https://github.com/acme/widgets|widgets> \
             <https://github.com/acme/widgets/pull/42|#42> (Build <https://ci.acme.io/acme/widgets/pr-42/3|#3>)"
        );
        assert_eq!(header.callback_id, "pipelineactivity:acme-widgets-pr-42-3");
        assert_eq!(header.color, "#3AA3E3");
        let buttons: Vec<(&str, &str)> = header
            .actions
            .iter()
            .map(|a| (a.text.as_str(), a.url.as_str()))
            .collect();
        assert_eq!(
            buttons,
            vec![
                ("Repository", "https://github.com/acme/widgets"),
                ("Pipeline", "https://ci.acme.io/acme/widgets/pr-42/3"),
                (
                    "Build Logs",
                    "https://storage.cloud.google.com/acme-logs/widgets/pr-42/3.log"
                ),
            ]
        );
        assert!(header.fallback.starts_with("Repo: https://github.com/acme/widgets, Build: "));
        assert!(rendered.create_if_missing);
    }

    #[test]
    fn test_pipeline_names() {
        let policy = StatusPolicy::default();
        let mut release = activity();
        release.branch = "master".to_string();
        let rendered = pipeline_message(&release, None, None, &policy, now());
        assert!(rendered.message.attachments[0].title.starts_with("Release Pipeline "));

        let mut feature = activity();
        feature.branch = "feature-x".to_string();
        let rendered = pipeline_message(&feature, None, None, &policy, now());
        assert!(rendered.message.attachments[0].title.starts_with("Pipeline "));

        let rendered = pipeline_message(&activity(), Some(42), None, &policy, now());
        assert!(rendered.message.attachments[0].title.contains(" #42 (Build "));
    }

    #[test]
    fn test_old_or_undated_pipeline_is_update_only() {
        let policy = StatusPolicy::default();
        let mut old = activity();
        old.start_time = Some(now() - Duration::hours(25));
        assert!(!pipeline_message(&old, None, None, &policy, now()).create_if_missing);

        old.start_time = None;
        assert!(!pipeline_message(&old, None, None, &policy, now()).create_if_missing);
        assert_eq!(
            pipeline_message(&old, None, None, &policy, now()).message.attachments[0].ts,
            None
        );
    }

    #[test]
    fn test_stage_and_step_attachments() {
        let mut run = activity();
        run.stages = vec![
            Stage {
                name: "meta pipeline".to_string(),
                status: PipelineState::Succeeded,
                steps: vec![Stage {
                    name: "build create".to_string(),
                    status: PipelineState::Succeeded,
                    steps: vec![],
                }],
            },
            Stage {
                name: "from build pack".to_string(),
                status: PipelineState::Running,
                steps: vec![
                    Stage {
                        name: "setVersion tag".to_string(),
                        status: PipelineState::Succeeded,
                        steps: vec![],
                    },
                    Stage {
                        name: "git-merge".to_string(),
                        status: PipelineState::Succeeded,
                        steps: vec![],
                    },
                    Stage {
                        name: "Build make linux".to_string(),
                        status: PipelineState::Failed,
                        steps: vec![],
                    },
                    Stage {
                        name: "promote".to_string(),
                        status: PipelineState::Unknown,
                        steps: vec![],
                    },
                ],
            },
        ];

        let rendered = pipeline_message(&run, Some(42), None, &StatusPolicy::default(), now());
        let texts: Vec<&str> = rendered.message.attachments[1..]
            .iter()
            .map(|a| a.text.as_str())
            .collect();
        assert_eq!(
            texts,
            vec![
                ":white_check_mark: Meta Pipeline",
                ":white_circle: From Build Pack",
                ":white_check_mark: Set Version Tag",
                ":red_circle: Build Make Linux",
                "Promote",
            ]
        );
        assert_eq!(rendered.message.attachments[4].color, "danger");
        // The run is still going, so the header follows the last stage.
        assert_eq!(rendered.message.attachments[0].color, "#3AA3E3");
    }

    #[test]
    fn test_unnamed_stage() {
        let mut run = activity();
        run.stages = vec![Stage::default()];
        let rendered = pipeline_message(&run, None, None, &StatusPolicy::default(), now());
        assert_eq!(rendered.message.attachments[1].text, "Stage");
    }

    #[test]
    fn test_review_message() {
        let policy = StatusPolicy::default();
        let run = activity();
        let pr = pull_request();
        let review = review_status(&pr, false, &policy);
        let build = build_status(Some(&pr), run.status, &policy);
        let reviewers = vec!["<@U2>".to_string(), "<@U3>".to_string()];

        let rendered = review_message(&ReviewView {
            activity: &run,
            pull_request: &pr,
            author: "<@U1>",
            reviewers: &reviewers,
            review_status: &review,
            build_status: &build,
        });
        let attachment = &rendered.message.attachments[0];

        assert_eq!(
            attachment.text,
            "<@U2> <@U3> please review <https://github.com/acme/widgets/pull/42|Pull Request #42 (Add sprockets)> \
             created on <https://github.com/acme/|acme>/<https://github.com/acme/widgets|widgets> by <@U1>"
        );
        assert_eq!(attachment.callback_id, "preview:acme-widgets-pr-42-3");
        assert_eq!(attachment.fields[0].value, ":wave: not approved");
        assert_eq!(attachment.fields[1].value, ":white_circle: build running");
        assert_eq!(attachment.ts, run.start_time.map(|t| t.timestamp()));
        assert!(rendered.create_if_missing);
    }

    #[test]
    fn test_review_message_without_reviewers_and_terminal_state() {
        let policy = StatusPolicy::default();
        let run = activity();
        let mut pr = pull_request();
        pr.merged = true;
        let review = review_status(&pr, false, &policy);
        let build = build_status(Some(&pr), run.status, &policy);

        let rendered = review_message(&ReviewView {
            activity: &run,
            pull_request: &pr,
            author: "octocat",
            reviewers: &[],
            review_status: &review,
            build_status: &build,
        });

        assert!(rendered.message.attachments[0].text.starts_with("Please review "));
        assert_eq!(rendered.message.attachments[0].fields[1].value, ":purple_heart: merged");
        assert!(!rendered.create_if_missing);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let pr = pull_request();
        let policy = StatusPolicy::default();
        let a = pipeline_message(&activity(), Some(42), Some(&pr), &policy, now());
        let b = pipeline_message(&activity(), Some(42), Some(&pr), &policy, now());
        assert_eq!(
            serde_json::to_vec(&a.message).unwrap(),
            serde_json::to_vec(&b.message).unwrap()
        );
    }

    #[test]
    fn test_mention_or_link() {
        let identity = ChatIdentity {
            user_id: "U9".to_string(),
        };
        let mut user = VcsUser::new("octocat");
        assert_eq!(mention_or_link(&user, Some(&identity)), "<@U9>");
        assert_eq!(mention_or_link(&user, None), "octocat");

        user.name = Some("The Octocat".to_string());
        assert_eq!(mention_or_link(&user, None), "The Octocat");
        user.url = Some("https://github.com/octocat".to_string());
        assert_eq!(
            mention_or_link(&user, None),
            "<https://github.com/octocat|The Octocat>"
        );
    }

    #[test]
    fn test_step_filter_and_names() {
        assert!(is_user_pipeline_step("PREBUILD check"));
        assert!(is_user_pipeline_step("setVersion"));
        assert!(!is_user_pipeline_step("git-source-abc"));
        assert!(!is_user_pipeline_step("   "));
        assert_eq!(friendly_name("postBuild  scan"), "Post-Build Scan");
    }
}
