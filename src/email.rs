//! Outbound message data structures

use serde::Serialize;

/// Content kind of the single body forwarded to Graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BodyKind {
    #[serde(rename = "Text")]
    Text,
    #[serde(rename = "HTML")]
    Html,
}

impl BodyKind {
    /// Short lowercase label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Text => "text",
            BodyKind::Html => "html",
        }
    }
}

/// The selected body of a message, serialized as a Graph `itemBody`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBody {
    #[serde(rename = "contentType")]
    pub kind: BodyKind,
    pub content: String,
}

impl MessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Text,
            content: content.into(),
        }
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self {
            kind: BodyKind::Html,
            content: content.into(),
        }
    }
}

/// A message accepted over SMTP and ready to be handed to the dispatcher.
///
/// The sender identity is not part of the message: the dispatcher always
/// sends from its configured mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Recipient addresses in RCPT order, duplicates kept
    pub recipients: Vec<String>,

    /// Decoded subject line
    pub subject: String,

    /// Selected body
    pub body: MessageBody,
}

impl OutboundMessage {
    pub fn new(recipients: Vec<String>, subject: impl Into<String>, body: MessageBody) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body,
        }
    }

    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }
}
