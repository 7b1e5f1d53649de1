//! Delivery of accepted messages through the Graph `sendMail` action

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::email::{MessageBody, OutboundMessage};
use crate::graph::credential::{bearer, TokenCredential};
use crate::graph::DispatchError;

/// Graph v1.0 REST root
pub const GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

/// Hands one accepted message to the remote API.
///
/// Exactly one delivery attempt per call; the caller decides what a failure
/// means for the SMTP transaction.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn dispatch(&self, message: &OutboundMessage) -> Result<(), DispatchError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress<'a> {
    address: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: EmailAddress<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: &'a MessageBody,
    to_recipients: Vec<Recipient<'a>>,
}

/// Body of `POST /users/{id}/sendMail`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
    save_to_sent_items: bool,
}

impl<'a> SendMailRequest<'a> {
    /// Build the request for `message`, keeping a copy in Sent Items
    pub fn new(message: &'a OutboundMessage) -> Self {
        Self {
            message: GraphMessage {
                subject: &message.subject,
                body: &message.body,
                to_recipients: message
                    .recipients
                    .iter()
                    .map(|address| Recipient {
                        email_address: EmailAddress { address },
                    })
                    .collect(),
            },
            save_to_sent_items: true,
        }
    }
}

/// Sends every message from one fixed mailbox
pub struct GraphDispatcher {
    sender: String,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
    http_client: reqwest::Client,
}

impl GraphDispatcher {
    pub fn new(sender: impl Into<String>, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            sender: sender.into(),
            endpoint: GRAPH_ENDPOINT.to_string(),
            credential,
            http_client: reqwest::Client::new(),
        }
    }

    /// Builder method to set the Graph REST root.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Builder method to share an HTTP client.
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// The mailbox every message is sent from
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn send_mail_url(&self) -> String {
        format!(
            "{}/users/{}/sendMail",
            self.endpoint.trim_end_matches('/'),
            self.sender
        )
    }
}

#[async_trait]
impl MailDispatcher for GraphDispatcher {
    async fn dispatch(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        let token = self
            .credential
            .access_token()
            .await
            .map_err(|e| DispatchError::Authorization(e.to_string()))?;

        let response = self
            .http_client
            .post(self.send_mail_url())
            .header(reqwest::header::AUTHORIZATION, bearer(&token))
            .json(&SendMailRequest::new(message))
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Graph accepted the message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DispatchError::Authorization(
                format!("HTTP {}: {body}", status.as_u16()),
            )),
            _ => Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
