//! SMTP listener and session handling

pub mod backend;
pub mod commands;
pub mod error;
pub mod mime;
pub mod response;
pub mod server;
pub mod session;

pub use backend::{AuthPolicy, RelayBackend};
pub use error::{SmtpError, SmtpLimits};
pub use mime::{ParseError, ParsedMessage};
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{Envelope, InputMode, SmtpSession, SmtpState};
