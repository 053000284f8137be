use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Call,
    Message,
}

/// A device-level action that reaches a contact: navigating to a `tel:` URI
/// or opening a messaging deep link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAction {
    pub kind: ChannelKind,
    pub url: String,
    /// Open in a new browsing context instead of replacing the current one.
    pub new_context: bool,
}

impl ChannelAction {
    #[must_use]
    pub fn call(digits: &str) -> Self {
        Self {
            kind: ChannelKind::Call,
            url: format!("tel:{digits}"),
            new_context: false,
        }
    }

    /// `encoded_text` must already be percent-encoded.
    #[must_use]
    pub fn message(base_url: &str, digits: &str, encoded_text: &str) -> Self {
        Self {
            kind: ChannelKind::Message,
            url: format!(
                "{}/{digits}?text={encoded_text}",
                base_url.trim_end_matches('/')
            ),
            new_context: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ChannelError {
    #[error("no handler registered for {scheme} links")]
    NoHandler { scheme: String },

    #[error("platform rejected channel action: {reason}")]
    Rejected { reason: String },
}

/// Hands channel actions to the platform. Success means the action was
/// issued, never that anyone received it.
#[async_trait]
pub trait ChannelInvoker: Send + Sync {
    async fn invoke(&self, action: &ChannelAction) -> Result<(), ChannelError>;
}
