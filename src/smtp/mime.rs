//! MIME body extraction
//!
//! Turns the payload received after `DATA` into a [`ParsedMessage`]: the
//! subject plus the last inline text and HTML parts. Attachments are
//! recognised and dropped.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use thiserror::Error;
use tracing::{debug, warn};

use crate::email::{BodyKind, MessageBody};

/// Subject used when the header is missing or cannot be decoded
pub const NO_SUBJECT: &str = "(No Subject)";

/// The payload could not be framed as a message at all
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("message payload is empty")]
    Empty,

    #[error("message could not be parsed")]
    Malformed,
}

/// A single part could not be read; the rest of the message is still usable
#[derive(Error, Debug)]
pub enum PartError {
    #[error("part {index} has a transfer-encoding problem")]
    Encoding { index: usize },

    #[error("inline part {index} is not valid UTF-8")]
    NotText { index: usize },
}

/// One leaf part of a message
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    /// Content meant for display
    Inline { kind: BodyKind, content: String },
    /// Content meant to be saved; only the file name is kept
    Attachment { filename: Option<String> },
}

/// Result of extracting a message payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMessage {
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

impl ParsedMessage {
    /// HTML wins whenever it is non-empty
    pub fn body_kind(&self) -> BodyKind {
        if self.body_html.is_empty() {
            BodyKind::Text
        } else {
            BodyKind::Html
        }
    }

    pub fn into_body(self) -> MessageBody {
        match self.body_kind() {
            BodyKind::Html => MessageBody::html(self.body_html),
            BodyKind::Text => MessageBody::text(self.body_text),
        }
    }
}

/// Lazy iterator over the leaf parts of a parsed message.
///
/// Container parts (multipart nodes) are skipped. A part that cannot be read
/// yields an `Err` and iteration continues with the next one.
pub struct Parts<'a, 'x> {
    message: &'a Message<'x>,
    index: usize,
}

impl<'a, 'x> Parts<'a, 'x> {
    pub fn new(message: &'a Message<'x>) -> Self {
        Self { message, index: 0 }
    }
}

impl Iterator for Parts<'_, '_> {
    type Item = Result<MessagePart, PartError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(part) = self.message.parts.get(self.index) {
            let index = self.index;
            self.index += 1;

            // A part is inline when it says so, or when it is text and does
            // not ask to be saved. Parts without a content type are text/plain.
            let disposition = part
                .content_disposition()
                .map(|disposition| disposition.c_type.to_ascii_lowercase());
            let is_text = part
                .content_type()
                .is_none_or(|ct| ct.c_type.eq_ignore_ascii_case("text"));
            let is_inline = match disposition.as_deref() {
                Some("inline") => true,
                Some("attachment") => false,
                _ => is_text,
            };

            let content = match &part.body {
                PartType::Multipart(_) => continue,
                PartType::Message(_) => {
                    return Some(Ok(MessagePart::Attachment {
                        filename: part.attachment_name().map(str::to_string),
                    }));
                }
                _ if !is_inline => {
                    return Some(Ok(MessagePart::Attachment {
                        filename: part.attachment_name().map(str::to_string),
                    }));
                }
                _ if part.is_encoding_problem => {
                    return Some(Err(PartError::Encoding { index }));
                }
                PartType::Text(text) | PartType::Html(text) => text.to_string(),
                PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => return Some(Err(PartError::NotText { index })),
                    }
                }
            };

            let is_html = part.content_type().is_some_and(|ct| {
                ct.c_type.eq_ignore_ascii_case("text")
                    && ct
                        .c_subtype
                        .as_deref()
                        .is_some_and(|sub| sub.eq_ignore_ascii_case("html"))
            });
            let kind = if is_html { BodyKind::Html } else { BodyKind::Text };

            return Some(Ok(MessagePart::Inline { kind, content }));
        }

        None
    }
}

/// Parse the payload and hand the framed message to `f`.
///
/// Fails only when the payload is blank or cannot be framed. An empty header
/// block is fine. Bad parts are left for the caller to skip.
pub fn with_message<T>(payload: &[u8], f: impl FnOnce(&Message<'_>) -> T) -> Result<T, ParseError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    let message = MessageParser::default()
        .parse(payload)
        .ok_or(ParseError::Malformed)?;

    Ok(f(&message))
}

/// Extract subject and bodies from a raw message payload
pub fn extract(payload: &[u8]) -> Result<ParsedMessage, ParseError> {
    with_message(payload, |message| {
        let mut parsed = ParsedMessage {
            subject: message.subject().unwrap_or(NO_SUBJECT).to_string(),
            ..Default::default()
        };

        for part in Parts::new(message) {
            match part {
                Ok(MessagePart::Inline { kind: BodyKind::Html, content }) => {
                    parsed.body_html = content;
                }
                Ok(MessagePart::Inline { kind: BodyKind::Text, content }) => {
                    parsed.body_text = content;
                }
                Ok(MessagePart::Attachment { filename }) => {
                    warn!(
                        filename = filename.as_deref().unwrap_or(""),
                        "Attachment detected but not supported. Skipping."
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read part");
                }
            }
        }

        debug!(
            subject = %parsed.subject,
            kind = parsed.body_kind().as_str(),
            "Message extracted"
        );
        parsed
    })
}
