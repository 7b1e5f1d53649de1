//! SMTP response handling

use crate::smtp::error::SmtpLimits;

/// Extensions advertised in the EHLO reply
const CAPABILITIES: [&str; 3] = ["PIPELINING", "8BITMIME", "AUTH PLAIN"];

/// Represents an SMTP response that can be sent to a client
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Optional multiline messages for EHLO responses
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    /// Create a new multiline SMTP response
    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    /// Create a success response (250 OK)
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// Create a greeting response (220)
    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", &format!("{hostname} ESMTP Service Ready"))
    }

    /// Create a HELO response (250)
    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{hostname} Hello {client_domain}"))
    }

    /// Create an EHLO response (250) with capabilities
    pub fn ehlo(hostname: &str, client_domain: &str) -> Self {
        let mut capabilities: Vec<String> = CAPABILITIES.iter().map(|c| c.to_string()).collect();
        capabilities.insert(2, format!("SIZE {}", SmtpLimits::MAX_DATA_SIZE));
        Self::new_multiline(
            "250",
            &format!("{hostname} Hello {client_domain}"),
            capabilities,
        )
    }

    /// Create an empty AUTH challenge (334)
    pub fn auth_challenge() -> Self {
        Self::new("334", "")
    }

    /// Create an AUTH success response (235)
    pub fn auth_success() -> Self {
        Self::new("235", "2.7.0 Authentication successful")
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    /// Create the response sent once a message has been relayed (250)
    pub fn message_accepted() -> Self {
        Self::new("250", "OK: message accepted for delivery")
    }

    /// Create a QUIT response (221)
    pub fn quit() -> Self {
        Self::new("221", "Bye")
    }

    /// Create an error response from an error
    pub fn error(code: &str, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        if let Some(ref lines) = self.multiline {
            let mut result = format!("{}-{}\r\n", self.code, self.message);
            for (i, line) in lines.iter().enumerate() {
                if i == lines.len() - 1 {
                    // Last line uses space instead of dash
                    result.push_str(&format!("{} {}\r\n", self.code, line));
                } else {
                    result.push_str(&format!("{}-{}\r\n", self.code, line));
                }
            }
            result
        } else {
            format!("{} {}\r\n", self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let response = SmtpResponse::ok();
        assert_eq!(response.code, "250");
        assert_eq!(response.message, "OK");
    }

    #[test]
    fn test_greeting_response() {
        let response = SmtpResponse::greeting("relay.local");
        assert_eq!(response.code, "220");
        assert_eq!(response.format(), "220 relay.local ESMTP Service Ready\r\n");
    }

    #[test]
    fn test_ehlo_response() {
        let response = SmtpResponse::ehlo("server.local", "client.local");
        assert_eq!(response.code, "250");

        let formatted = response.format();
        assert_eq!(
            formatted,
            format!(
                "250-server.local Hello client.local\r\n\
                 250-PIPELINING\r\n\
                 250-8BITMIME\r\n\
                 250-SIZE {}\r\n\
                 250 AUTH PLAIN\r\n",
                SmtpLimits::MAX_DATA_SIZE
            )
        );
    }

    #[test]
    fn test_auth_challenge_format() {
        assert_eq!(SmtpResponse::auth_challenge().format(), "334 \r\n");
    }

    #[test]
    fn test_auth_success_response() {
        let response = SmtpResponse::auth_success();
        assert_eq!(response.code, "235");
        assert_eq!(response.message, "2.7.0 Authentication successful");
    }

    #[test]
    fn test_quit_response() {
        let response = SmtpResponse::quit();
        assert_eq!(response.code, "221");
        assert_eq!(response.message, "Bye");
    }

    #[test]
    fn test_error_response_format() {
        let response = SmtpResponse::error("554", "Transaction failed");
        assert_eq!(response.format(), "554 Transaction failed\r\n");
    }
}
