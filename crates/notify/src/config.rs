//! Bot configuration: notification rules, status overrides and the user
//! directory.
//!
//! Rules are loaded from YAML; credentials for the chat and VCS services are
//! read from the environment by the collaborators that need them.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::eligibility::OrgFilter;
use crate::error::ConfigError;
use crate::status::StatusPolicy;

/// Default timeout for every provider and sink call.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// One notification rule. Rules are evaluated independently and may each
/// fire for the same activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Channel to post to, with or without the leading `#`
    pub channel: Option<String>,
    /// Also message the pull request author (pipeline rules) or the
    /// requested reviewers (review rules) directly
    pub direct_message: bool,
    /// Mention requested reviewers in review messages
    pub notify_reviewers: bool,
    /// Allow-list; empty admits every repository
    pub orgs: Vec<OrgFilter>,
    /// Pull requests carrying any of these labels are skipped
    pub ignore_labels: Vec<String>,
    /// Status overrides for this rule only
    pub statuses: StatusPolicy,
}

impl Rule {
    /// Configured channel in `#name` form.
    #[must_use]
    pub fn channel_name(&self) -> Option<String> {
        self.channel
            .as_deref()
            .map(|channel| {
                if channel.starts_with('#') {
                    channel.to_string()
                } else {
                    format!("#{channel}")
                }
            })
    }

    /// Status policy for this rule: rule overrides, then `global` overrides,
    /// then defaults.
    #[must_use]
    pub fn policy(&self, global: &StatusPolicy) -> StatusPolicy {
        self.statuses.layered_over(global)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Rules for pipeline messages
    pub pipelines: Vec<Rule>,
    /// Rules for pull request review messages
    pub pull_requests: Vec<Rule>,
    /// Status overrides shared by every rule
    pub statuses: StatusPolicy,
    /// Repositories that use `lgtm` instead of `approved`
    pub lgtm_repos: Vec<OrgFilter>,
    /// VCS login -> chat user id
    pub users: HashMap<String, String>,
    pub call_timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pipelines: vec![],
            pull_requests: vec![],
            statuses: StatusPolicy::default(),
            lgtm_repos: vec![],
            users: HashMap::new(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

impl BotConfig {
    /// Parse and validate a YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a rule is invalid.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Check that every rule has somewhere to send to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        validate_rules("pipelines", &self.pipelines)?;
        validate_rules("pull_requests", &self.pull_requests)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Whether `owner/repo` reviews with the `lgtm` label.
    #[must_use]
    pub fn is_lgtm_repo(&self, owner: &str, repo: &str) -> bool {
        self.lgtm_repos.iter().any(|org| org.admits(owner, repo))
    }
}

/// Rules are numbered from zero within their own list.
fn validate_rules(list: &str, rules: &[Rule]) -> Result<(), ConfigError> {
    for (index, rule) in rules.iter().enumerate() {
        if rule.channel.as_deref().is_some_and(|c| c.trim_start_matches('#').is_empty()) {
            return Err(ConfigError::Invalid(format!("{list} rule {index} has an empty channel")));
        }
        if rule.channel.is_none() && !rule.direct_message {
            return Err(ConfigError::Invalid(format!(
                "{list} rule {index} has neither a channel nor direct messages"
            )));
        }
        if let Some(org) = rule.orgs.iter().find(|org| org.name.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "{list} rule {index} has an organization without a name (repos: {:?})",
                org.repos
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;

    const EXAMPLE: &str = r##"
pipelines:
  - channel: builds
    direct_message: true
    orgs:
      - name: acme
        repos: [widgets]
    ignore_labels: [skip-notify]
pull_requests:
  - channel: "#reviews"
    direct_message: true
    notify_reviewers: true
    statuses:
      hold: { emoji: ":pause:", text: "paused" }
statuses:
  hold: { emoji: ":no_entry:", text: "on hold" }
  merged: { emoji: ":tada:", text: "shipped" }
lgtm_repos:
  - name: acme
users:
  octocat: U123
call_timeout_secs: 5
"##;

    #[test]
    fn test_parses_example_configuration() {
        let config = BotConfig::from_yaml(EXAMPLE).unwrap();

        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.pipelines[0].channel_name().as_deref(), Some("#builds"));
        assert_eq!(config.pull_requests[0].channel_name().as_deref(), Some("#reviews"));
        assert!(config.pull_requests[0].notify_reviewers);
        assert!(!config.pipelines[0].notify_reviewers);
        assert_eq!(config.users["octocat"], "U123");
        assert_eq!(config.call_timeout(), Duration::from_secs(5));
        assert!(config.is_lgtm_repo("acme", "anything"));
        assert!(!config.is_lgtm_repo("globex", "widgets"));
    }

    #[test]
    fn test_rule_policy_layers_over_global() {
        let config = BotConfig::from_yaml(EXAMPLE).unwrap();
        let policy = config.pull_requests[0].policy(&config.statuses);

        assert_eq!(policy.resolve(StatusKind::Hold).text, "paused");
        assert_eq!(policy.resolve(StatusKind::Merged).text, "shipped");
        assert_eq!(policy.resolve(StatusKind::Approved).text, "approved");
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::from_yaml("{}").unwrap();
        assert!(config.pipelines.is_empty());
        assert_eq!(config.call_timeout_secs, DEFAULT_CALL_TIMEOUT_SECS);
        assert!(!config.is_lgtm_repo("acme", "widgets"));
    }

    #[test]
    fn test_rejects_rule_without_target() {
        let err = BotConfig::from_yaml("pipelines:\n  - orgs: [{ name: acme }]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("pipelines rule 0")));
    }

    #[test]
    fn test_numbers_review_rules_within_their_own_list() {
        let yaml = "
pipelines:
  - channel: builds
  - channel: deploys
pull_requests:
  - orgs: [{ name: acme }]
";
        let err = BotConfig::from_yaml(yaml).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Invalid(msg) if msg.contains("pull_requests rule 0")),
            "{err}"
        );
    }

    #[test]
    fn test_rejects_empty_channel_and_zero_timeout() {
        assert!(BotConfig::from_yaml("pull_requests:\n  - channel: \"#\"\n").is_err());
        assert!(BotConfig::from_yaml("call_timeout_secs: 0\n").is_err());
    }

    #[test]
    fn test_reports_unreadable_file() {
        let err = BotConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
