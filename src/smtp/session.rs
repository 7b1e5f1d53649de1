//! SMTP session state management

use std::mem;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::email::OutboundMessage;
use crate::smtp::backend::RelayBackend;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::mime;

/// Envelope state of the current transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// No transaction in progress
    Idle,
    /// MAIL FROM received - ready for RCPT commands
    HaveSender,
    /// At least one RCPT TO received - ready for DATA or more RCPT commands
    HaveRecipients,
}

/// What the next input line from the client means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// A command line
    Command,
    /// A line of message content, until the terminating "."
    Data,
    /// The base64 answer to an AUTH PLAIN challenge
    AuthPlain,
}

/// Sender and recipients of a transaction that is ready for DATA.
///
/// An envelope always holds at least one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    recipients: Vec<String>,
}

impl Envelope {
    fn new(sender: String, first_recipient: String) -> Self {
        Self {
            sender,
            recipients: vec![first_recipient],
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Recipients in RCPT order, duplicates kept
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn into_recipients(self) -> Vec<String> {
        self.recipients
    }
}

#[derive(Debug, Default)]
enum Transaction {
    #[default]
    Idle,
    HaveSender {
        sender: String,
    },
    HaveRecipients(Envelope),
}

/// Manages the state and data for a single SMTP session
#[derive(Debug)]
pub struct SmtpSession {
    backend: Arc<RelayBackend>,
    transaction: Transaction,
    /// How the next line from the client is interpreted
    pub mode: InputMode,
    /// Client domain from HELO/EHLO
    pub client_domain: Option<String>,
    authenticated: bool,
    closed: bool,
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new(backend: Arc<RelayBackend>) -> Self {
        Self {
            backend,
            transaction: Transaction::Idle,
            mode: InputMode::Command,
            client_domain: None,
            authenticated: false,
            closed: false,
        }
    }

    pub fn state(&self) -> SmtpState {
        match self.transaction {
            Transaction::Idle => SmtpState::Idle,
            Transaction::HaveSender { .. } => SmtpState::HaveSender,
            Transaction::HaveRecipients(_) => SmtpState::HaveRecipients,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match &self.transaction {
            Transaction::Idle => None,
            Transaction::HaveSender { sender } => Some(sender),
            Transaction::HaveRecipients(envelope) => Some(envelope.sender()),
        }
    }

    pub fn recipients(&self) -> &[String] {
        match &self.transaction {
            Transaction::HaveRecipients(envelope) => envelope.recipients(),
            _ => &[],
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Clear the current transaction; keeps HELO and AUTH state
    pub fn reset(&mut self) {
        self.transaction = Transaction::Idle;
        self.mode = InputMode::Command;
    }

    /// Mark the connection for termination. Pending envelope data is dropped.
    pub fn logout(&mut self) {
        self.closed = true;
        self.reset();
    }

    /// Set the client domain from HELO/EHLO command
    pub fn set_client_domain(&mut self, domain: String) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain);
        self.reset();
        Ok(())
    }

    /// Check the credential pair against the configured policy
    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<(), SmtpError> {
        self.mode = InputMode::Command;

        if self.authenticated {
            return Err(SmtpError::InvalidState("Already authenticated".to_string()));
        }

        if !self.backend.auth().verify(username, password) {
            warn!(username, "Authentication failed");
            return Err(SmtpError::AuthenticationFailed);
        }

        self.authenticated = true;
        Ok(())
    }

    /// Set the sender address, discarding any transaction in progress
    pub fn set_sender(&mut self, sender: String) -> Result<(), SmtpError> {
        if sender.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        if self.backend.auth().is_required() && !self.authenticated {
            return Err(SmtpError::AuthenticationRequired);
        }

        self.transaction = Transaction::HaveSender { sender };
        Ok(())
    }

    /// Add a recipient address
    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        if recipient.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        self.transaction = match mem::take(&mut self.transaction) {
            Transaction::Idle => {
                return Err(SmtpError::InvalidState(
                    "RCPT command requires MAIL first".to_string(),
                ));
            }
            Transaction::HaveSender { sender } => {
                Transaction::HaveRecipients(Envelope::new(sender, recipient))
            }
            Transaction::HaveRecipients(mut envelope) => {
                envelope.recipients.push(recipient);
                Transaction::HaveRecipients(envelope)
            }
        };
        Ok(())
    }

    /// Start data collection mode
    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if self.state() != SmtpState::HaveRecipients {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.mode = InputMode::Data;
        Ok(())
    }

    /// Take the envelope out of the session, leaving it idle
    fn take_envelope(&mut self) -> Option<Envelope> {
        match mem::take(&mut self.transaction) {
            Transaction::HaveRecipients(envelope) => Some(envelope),
            other => {
                self.transaction = other;
                None
            }
        }
    }

    /// Extract the message body and hand it to the dispatcher.
    ///
    /// The transaction ends here whatever the outcome.
    pub async fn submit_body(&mut self, payload: &[u8]) -> Result<(), SmtpError> {
        self.mode = InputMode::Command;

        let envelope = self.take_envelope().ok_or_else(|| {
            SmtpError::InvalidState("No recipients specified".to_string())
        })?;

        let parsed = match mime::extract(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(
                    error = %e,
                    from = envelope.sender(),
                    recipient_count = envelope.recipients().len(),
                    "Failed to parse message"
                );
                return Err(e.into());
            }
        };

        info!(
            from = envelope.sender(),
            to = ?envelope.recipients(),
            subject = %parsed.subject,
            "Processing email"
        );

        let sender = envelope.sender().to_string();
        let subject = parsed.subject.clone();
        let message = OutboundMessage::new(envelope.into_recipients(), subject, parsed.into_body());

        if let Err(e) = self.backend.dispatcher().dispatch(&message).await {
            error!(
                error = %e,
                from = %sender,
                recipient_count = message.recipient_count(),
                subject = %message.subject,
                "Failed to send email via Graph"
            );
            return Err(e.into());
        }

        info!(
            recipient_count = message.recipient_count(),
            "Email sent successfully"
        );
        Ok(())
    }

    /// Check if the session is ready for a specific command
    pub fn can_execute_command(&self, command: &str) -> bool {
        match command.to_uppercase().as_str() {
            "HELO" | "EHLO" => true,
            "AUTH" => self.client_domain.is_some() && self.state() == SmtpState::Idle,
            "MAIL" => self.client_domain.is_some(),
            "RCPT" => self.state() != SmtpState::Idle,
            "DATA" => self.state() == SmtpState::HaveRecipients,
            "RSET" | "NOOP" | "QUIT" => true,
            _ => false,
        }
    }

    /// Get the current recipient count
    pub fn recipient_count(&self) -> usize {
        self.recipients().len()
    }
}
