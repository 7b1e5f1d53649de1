use thiserror::Error;

/// Failure to build the credential used for Graph calls.
///
/// Raised at startup; the process cannot run without a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The certificate bundle could not be read
    #[error("failed to read certificate: {0}")]
    Read(#[from] std::io::Error),

    /// The bundle is not valid PEM or lacks a required block
    #[error("failed to decode certificate bundle: {0}")]
    Decode(String),

    /// The private key could not be loaded (wrong passphrase, unsupported type)
    #[error("failed to load private key: {0}")]
    PrivateKey(String),

    /// The client assertion could not be signed
    #[error("failed to sign client assertion: {0}")]
    Assertion(String),

    /// The token endpoint refused or could not be reached
    #[error("token request failed: {0}")]
    TokenRequest(String),
}

/// Failure to deliver one message through Graph.
///
/// All variants are reported to the SMTP client the same way.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No usable access token, or Graph answered 401/403
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// Graph answered with a non-success status
    #[error("Graph rejected the message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}
