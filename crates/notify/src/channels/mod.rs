//! Chat transports that messages are delivered through.

pub mod slack;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::message::Message;
use crate::store::MessageReference;

pub use slack::SlackSink;

/// Trait for chat transports (Slack, etc.).
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Get the name of this sink.
    fn name(&self) -> &'static str;

    /// Post a new message to `destination` and return where it landed.
    async fn send(&self, destination: &str, message: &Message)
        -> Result<MessageReference, SinkError>;

    /// Replace the content of a previously sent message.
    async fn update(&self, reference: &MessageReference, message: &Message)
        -> Result<(), SinkError>;

    /// Open (or reuse) a direct conversation with a user and return its
    /// channel id.
    async fn open_direct_conversation(&self, user_id: &str) -> Result<String, SinkError>;
}
