//! Chat message content, shaped like Slack message attachments.

use serde::{Deserialize, Serialize};

/// A rendered message: a list of attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub callback_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mrkdwn_in: Vec<String>,
    /// Unix timestamp shown in the attachment footer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

/// A link button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub url: String,
}

impl Action {
    #[must_use]
    pub fn button(text: &str, url: &str) -> Self {
        Self {
            kind: "button".to_string(),
            text: text.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// Slack link markup; plain `text` when there is no URL.
#[must_use]
pub fn link(text: &str, url: &str) -> String {
    if url.is_empty() {
        return text.to_string();
    }
    let text = if text.is_empty() { url } else { text };
    format!("<{url}|{text}>")
}

/// Slack user mention markup.
#[must_use]
pub fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}
