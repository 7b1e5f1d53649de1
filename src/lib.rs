//! # GraphRelay
//!
//! GraphRelay is an SMTP relay that delivers mail through Microsoft Graph.
//!
//! It lets devices and legacy applications that only speak SMTP send mail
//! from a Microsoft 365 mailbox without SMTP AUTH being enabled on the tenant.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use graphrelay::{AuthPolicy, ClientCertificateCredential, GraphDispatcher, RelayBackend, SmtpServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = ClientCertificateCredential::from_file(
//!     "tenant-id",
//!     "client-id",
//!     "/etc/graphrelay/bundle.pem",
//!     None,
//! )?;
//! let dispatcher = GraphDispatcher::new("relay@contoso.com", Arc::new(credential));
//! let backend = RelayBackend::new(AuthPolicy::Disabled, Arc::new(dispatcher));
//!
//! let server = SmtpServer::new("localhost", Arc::new(backend));
//! server.start("0.0.0.0:8025").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `AUTH PLAIN` - Authenticate, with or without an initial response
//! - `MAIL FROM` - Specify the sender's address (parameters are ignored)
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the message
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! ## Delivery
//!
//! Each message is reduced to a subject and a single body. The HTML part
//! wins over the plain text part; attachments are logged and dropped. The
//! result goes to every RCPT recipient in one Graph `sendMail` call from the
//! configured mailbox. The envelope sender is not used.
//!
//! The SMTP reply is only sent once Graph has answered, so a `250` means the
//! message was handed to Exchange.
//!
//! ## Notes
//!
//! - SSL/TLS connection is not supported. Run it behind a trusted network boundary.
//! - Failed deliveries are not queued or retried.
//!
//! ## Size Limits
//!
//! - User names: 64 characters max
//! - Domain names: 255 characters max
//! - Paths: 256 characters max
//! - Command lines: 512 characters max
//! - Text lines: 1000 characters max
//! - Recipients: 50 max per message
//! - Messages: 10 MiB max

pub mod config;
pub mod email;
pub mod graph;
pub mod health;
pub mod logging;
pub mod smtp;

pub use config::{Config, ConfigError};
pub use email::{BodyKind, MessageBody, OutboundMessage};
pub use graph::{
    ClientCertificateCredential, CredentialError, DispatchError, GraphDispatcher, MailDispatcher,
    TokenCredential,
};
pub use smtp::{
    AuthPolicy, RelayBackend, SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession,
    SmtpState,
};
