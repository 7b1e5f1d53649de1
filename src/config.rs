//! Configuration loaded from environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::smtp::backend::AuthPolicy;

/// Relay configuration.
#[derive(Clone)]
pub struct Config {
    /// Azure AD tenant the application is registered in.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// PEM bundle holding the certificate and its private key.
    pub cert_path: PathBuf,
    /// Passphrase for an encrypted private key.
    pub cert_password: Option<SecretString>,
    /// Mailbox every message is sent from.
    pub email_from: String,
    /// SMTP bind host.
    pub smtp_host: String,
    /// SMTP bind port.
    pub smtp_port: u16,
    /// Hostname announced in the greeting.
    pub smtp_domain: String,
    /// SMTP AUTH policy.
    pub auth: AuthPolicy,
    /// Health listener port.
    pub health_port: u16,
    /// Log verbosity.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `MS_GRAPH_TENANT_ID` | Azure AD tenant | (required) |
    /// | `MS_GRAPH_CLIENT_ID` | Application id | (required) |
    /// | `MS_GRAPH_CERT_PATH` | PEM bundle path | (required) |
    /// | `MS_GRAPH_CERT_PASS` | Private key passphrase | (none) |
    /// | `MS_GRAPH_EMAIL_FROM` | Sender mailbox | (required) |
    /// | `SMTP_HOST` | SMTP bind host | `0.0.0.0` |
    /// | `SMTP_PORT` | SMTP bind port | `8025` |
    /// | `SMTP_DOMAIN` | Greeting hostname | `localhost` |
    /// | `REQUIRE_AUTH` | Require SMTP AUTH | `false` |
    /// | `SMTP_AUTH_USERNAME` | AUTH user name | (required with auth) |
    /// | `SMTP_AUTH_PASSWORD` | AUTH password | (required with auth) |
    /// | `HEALTH_PORT` | Health listener port | `8080` |
    /// | `LOG_LEVEL` | `debug`, `info`, `warn` or `error` | `info` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let tenant_id = require("MS_GRAPH_TENANT_ID")?;
        let client_id = require("MS_GRAPH_CLIENT_ID")?;
        let email_from = require("MS_GRAPH_EMAIL_FROM")?;
        let cert_path = PathBuf::from(require("MS_GRAPH_CERT_PATH")?);
        let cert_password = get("MS_GRAPH_CERT_PASS").map(SecretString::from);

        let smtp_host = get("SMTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let smtp_port = parse_port("SMTP_PORT", get("SMTP_PORT"), 8025)?;
        let smtp_domain = get("SMTP_DOMAIN").unwrap_or_else(|| "localhost".to_string());
        let health_port = parse_port("HEALTH_PORT", get("HEALTH_PORT"), 8080)?;
        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let require_auth = match get("REQUIRE_AUTH") {
            Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                key: "REQUIRE_AUTH",
                value,
            })?,
            None => false,
        };

        let auth = if require_auth {
            AuthPolicy::required(
                require("SMTP_AUTH_USERNAME")?,
                require("SMTP_AUTH_PASSWORD")?,
            )
        } else {
            AuthPolicy::Disabled
        };

        Ok(Self {
            tenant_id,
            client_id,
            cert_path,
            cert_password,
            email_from,
            smtp_host,
            smtp_port,
            smtp_domain,
            auth,
            health_port,
            log_level,
        })
    }

    /// `host:port` the SMTP listener binds to
    pub fn smtp_addr(&self) -> String {
        format!("{}:{}", self.smtp_host, self.smtp_port)
    }

    /// Leading characters of the tenant id, enough to tell tenants apart in logs
    pub fn tenant_hint(&self) -> String {
        let prefix: String = self.tenant_id.chars().take(8).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("tenant_id", &self.tenant_hint())
            .field("client_id", &self.client_id)
            .field("cert_path", &self.cert_path)
            .field("email_from", &self.email_from)
            .field("smtp_addr", &self.smtp_addr())
            .field("smtp_domain", &self.smtp_domain)
            .field("auth", &self.auth)
            .field("health_port", &self.health_port)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

fn parse_port(key: &'static str, value: Option<String>, default: u16) -> Result<u16, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Some(true),
        "0" | "f" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
