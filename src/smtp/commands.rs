//! Implementation of SMTP commands

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{InputMode, SmtpSession};

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    /// Create a new command handler
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    /// Process a command line and return a response
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        // Check command line length
        if command_line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let parts: Vec<&str> = command_line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(SmtpError::InvalidCommand);
        }

        let cmd = parts[0].to_uppercase();
        let argument = command_line.trim_start()[parts[0].len()..].trim();

        match cmd.as_str() {
            "HELO" => self.handle_helo(parts, session),
            "EHLO" => self.handle_ehlo(parts, session),
            "AUTH" => self.handle_auth(parts, session),
            "MAIL" => self.handle_mail(argument, session),
            "RCPT" => self.handle_rcpt(argument, session),
            "DATA" => self.handle_data(parts, session),
            "RSET" => self.handle_rset(session),
            "NOOP" => self.handle_noop(),
            "QUIT" => self.handle_quit(session),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    /// Handle the client's answer to an AUTH PLAIN challenge
    pub fn process_auth_response(
        &self,
        line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        session.mode = InputMode::Command;

        if line.trim() == "*" {
            return Err(SmtpError::AuthenticationCancelled);
        }

        self.authenticate_plain(line.trim(), session)
    }

    /// Handle HELO command
    fn handle_helo(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if parts.len() < 2 {
            return Err(SmtpError::InvalidSyntax(
                "HELO requires domain argument".to_string(),
            ));
        }

        let client_domain = parts[1].to_string();
        session.set_client_domain(client_domain.clone())?;

        Ok(SmtpResponse::helo(self.hostname, &client_domain))
    }

    /// Handle EHLO command
    fn handle_ehlo(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if parts.len() < 2 {
            return Err(SmtpError::InvalidSyntax(
                "EHLO requires domain argument".to_string(),
            ));
        }

        let client_domain = parts[1].to_string();
        session.set_client_domain(client_domain.clone())?;

        Ok(SmtpResponse::ehlo(self.hostname, &client_domain))
    }

    /// Handle AUTH command; only the PLAIN mechanism is offered
    fn handle_auth(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("AUTH") {
            return Err(SmtpError::InvalidState(
                "AUTH requires EHLO and no open transaction".to_string(),
            ));
        }

        let Some(mechanism) = parts.get(1) else {
            return Err(SmtpError::InvalidSyntax(
                "AUTH requires a mechanism".to_string(),
            ));
        };

        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return Err(SmtpError::UnsupportedMechanism(mechanism.to_string()));
        }

        match parts.get(2) {
            Some(initial_response) => self.authenticate_plain(initial_response, session),
            None => {
                session.mode = InputMode::AuthPlain;
                Ok(SmtpResponse::auth_challenge())
            }
        }
    }

    /// Decode a PLAIN response (`authzid NUL authcid NUL passwd`) and check it
    fn authenticate_plain(
        &self,
        encoded: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let decoded = STANDARD.decode(encoded).map_err(|_| {
            SmtpError::InvalidSyntax("AUTH PLAIN response is not valid base64".to_string())
        })?;

        let fields: Vec<&[u8]> = decoded.split(|byte| *byte == 0).collect();
        let [_authzid, username, password] = fields.as_slice() else {
            return Err(SmtpError::InvalidSyntax(
                "AUTH PLAIN response must have three fields".to_string(),
            ));
        };

        let (Ok(username), Ok(password)) = (
            std::str::from_utf8(username),
            std::str::from_utf8(password),
        ) else {
            return Err(SmtpError::InvalidSyntax(
                "AUTH PLAIN credentials must be UTF-8".to_string(),
            ));
        };

        session.authenticate(username, password)?;

        Ok(SmtpResponse::auth_success())
    }

    /// Handle MAIL command
    fn handle_mail(&self, argument: &str, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("MAIL") {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }

        let Some(path) = strip_prefix_ignore_case(argument, "FROM:") else {
            return Err(SmtpError::InvalidSyntax(
                "MAIL command must be 'MAIL FROM:<address>'".to_string(),
            ));
        };

        let addr = parse_path(path, "FROM")?;

        // The null reverse-path is allowed for bounces
        if !addr.is_empty() {
            self.validate_email_address(&addr)?;
        }

        session.set_sender(addr)?;

        Ok(SmtpResponse::ok())
    }

    /// Handle RCPT command
    fn handle_rcpt(&self, argument: &str, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RCPT") {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        let Some(path) = strip_prefix_ignore_case(argument, "TO:") else {
            return Err(SmtpError::InvalidSyntax(
                "RCPT command must be 'RCPT TO:<address>'".to_string(),
            ));
        };

        let addr = parse_path(path, "TO")?;
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "TO address cannot be empty".to_string(),
            ));
        }

        // Validate email address components
        self.validate_email_address(&addr)?;

        if session.recipient_count() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        session.add_recipient(addr)?;

        Ok(SmtpResponse::ok())
    }

    /// Handle DATA command
    fn handle_data(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("DATA") {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        if parts.len() > 1 {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        session.start_data_mode()?;

        Ok(SmtpResponse::data_start())
    }

    /// Handle RSET command
    fn handle_rset(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        session.reset();
        Ok(SmtpResponse::ok())
    }

    /// Handle NOOP command
    fn handle_noop(&self) -> Result<SmtpResponse, SmtpError> {
        Ok(SmtpResponse::ok())
    }

    /// Handle QUIT command
    fn handle_quit(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        session.logout();
        Ok(SmtpResponse::quit())
    }

    /// Validate email address format and size limits
    fn validate_email_address(&self, addr: &str) -> Result<(), SmtpError> {
        let Some((user_part, domain_part)) = addr.rsplit_once('@') else {
            return Err(SmtpError::InvalidSyntax(
                "Email address must contain @ symbol".to_string(),
            ));
        };

        if user_part.len() > SmtpLimits::USER_MAX_LENGTH {
            return Err(SmtpError::UserTooLong {
                max: SmtpLimits::USER_MAX_LENGTH,
            });
        }

        if domain_part.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        if user_part.is_empty() || domain_part.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "Invalid email address format".to_string(),
            ));
        }

        Ok(())
    }
}

fn strip_prefix_ignore_case<'s>(value: &'s str, prefix: &str) -> Option<&'s str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// Pull the address out of `<address> [parameters]`. Parameters are ignored.
fn parse_path(path: &str, label: &str) -> Result<String, SmtpError> {
    let path = path.trim_start();
    let inner = path
        .strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .map(|(addr, _parameters)| addr.trim());

    let Some(addr) = inner else {
        return Err(SmtpError::InvalidSyntax(format!(
            "{label} address must be enclosed in angle brackets"
        )));
    };

    if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    Ok(addr.to_string())
}
