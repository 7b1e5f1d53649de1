//! Certificate-based credential for the Microsoft identity platform.
//!
//! Implements the OAuth2 client-credentials flow with a signed client
//! assertion:
//!
//! 1. Build a JWT signed with the application's RSA private key, carrying the
//!    certificate thumbprint in the `x5t` header
//! 2. POST it to the tenant's token endpoint
//! 3. Receive an access token with an expiry
//! 4. Cache the token and refresh before expiry

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::graph::CredentialError;

/// Host of the Microsoft identity platform
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scope requesting the application permissions granted on Graph
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of a client assertion, in seconds
const ASSERTION_LIFETIME: i64 = 600;

/// Something that can hand out bearer tokens for Graph
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, CredentialError>;
}

/// JWT claims of a client assertion.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    /// Audience - the token endpoint.
    aud: &'a str,
    /// Issuer - the application id.
    iss: &'a str,
    /// Subject - the application id again.
    sub: &'a str,
    /// Unique id so the assertion cannot be replayed.
    jti: String,
    nbf: i64,
    iat: i64,
    exp: i64,
}

/// An OAuth2 access token with metadata.
#[derive(Clone)]
struct AccessToken {
    token: SecretString,
    /// When this token expires (unix timestamp seconds).
    expires_at: i64,
}

impl AccessToken {
    /// Check if the token is expired (with 60 s buffer).
    fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at - 60
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// The certificate and key pulled out of a PEM bundle
struct CertificateKey {
    /// base64url SHA-1 of the certificate DER
    thumbprint: String,
    encoding_key: EncodingKey,
}

impl CertificateKey {
    /// Decode a PEM bundle holding one certificate and one RSA private key.
    ///
    /// The key may be PKCS#1, PKCS#8 or encrypted PKCS#8; the latter needs
    /// `passphrase`.
    fn from_pem(bundle: &[u8], passphrase: Option<&str>) -> Result<Self, CredentialError> {
        let blocks = pem::parse_many(bundle).map_err(|e| CredentialError::Decode(e.to_string()))?;

        let certificate = blocks
            .iter()
            .find(|block| block.tag() == "CERTIFICATE")
            .ok_or_else(|| CredentialError::Decode("no CERTIFICATE block".to_string()))?;

        let key_block = blocks
            .iter()
            .find(|block| block.tag().ends_with("PRIVATE KEY"))
            .ok_or_else(|| CredentialError::Decode("no PRIVATE KEY block".to_string()))?;

        let key = match key_block.tag() {
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_der(key_block.contents())
                .map_err(|e| CredentialError::PrivateKey(e.to_string()))?,
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(key_block.contents())
                .map_err(|e| CredentialError::PrivateKey(e.to_string()))?,
            "ENCRYPTED PRIVATE KEY" => {
                let passphrase = passphrase.ok_or_else(|| {
                    CredentialError::PrivateKey("key is encrypted but no passphrase was given".to_string())
                })?;
                RsaPrivateKey::from_pkcs8_encrypted_der(key_block.contents(), passphrase)
                    .map_err(|e| CredentialError::PrivateKey(e.to_string()))?
            }
            other => {
                return Err(CredentialError::PrivateKey(format!(
                    "unsupported key type {other}"
                )));
            }
        };

        let der = key
            .to_pkcs1_der()
            .map_err(|e| CredentialError::PrivateKey(e.to_string()))?;

        Ok(Self {
            thumbprint: URL_SAFE_NO_PAD.encode(Sha1::digest(certificate.contents())),
            encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
        })
    }
}

/// Application credential backed by a certificate.
///
/// Built once at startup and shared by every session. The cached token is the
/// only state that changes after construction.
pub struct ClientCertificateCredential {
    client_id: String,
    token_url: String,
    key: CertificateKey,
    http_client: reqwest::Client,
    cached_token: Mutex<Option<AccessToken>>,
}

impl ClientCertificateCredential {
    /// Create a credential from an in-memory PEM bundle.
    pub fn new(
        tenant_id: &str,
        client_id: impl Into<String>,
        bundle: &[u8],
        passphrase: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let key = CertificateKey::from_pem(bundle, passphrase)?;

        Ok(Self {
            client_id: client_id.into(),
            token_url: token_url(DEFAULT_AUTHORITY, tenant_id),
            key,
            http_client: reqwest::Client::new(),
            cached_token: Mutex::new(None),
        })
    }

    /// Create a credential from a PEM bundle on disk.
    pub fn from_file(
        tenant_id: &str,
        client_id: impl Into<String>,
        path: impl AsRef<Path>,
        passphrase: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let bundle = std::fs::read(path)?;
        Self::new(tenant_id, client_id, &bundle, passphrase)
    }

    /// Point the credential at another authority host.
    pub fn with_authority(mut self, authority: &str, tenant_id: &str) -> Self {
        self.token_url = token_url(authority, tenant_id);
        self
    }

    /// Builder method to share an HTTP client.
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// base64url SHA-1 thumbprint of the certificate
    pub fn thumbprint(&self) -> &str {
        &self.key.thumbprint
    }

    /// Build a signed client assertion for the token endpoint.
    pub fn client_assertion(&self) -> Result<String, CredentialError> {
        let now = Utc::now().timestamp();

        let claims = AssertionClaims {
            aud: &self.token_url,
            iss: &self.client_id,
            sub: &self.client_id,
            jti: Uuid::new_v4().to_string(),
            nbf: now,
            iat: now,
            exp: now + ASSERTION_LIFETIME,
        };

        let header = Header {
            alg: Algorithm::RS256,
            x5t: Some(self.key.thumbprint.clone()),
            ..Default::default()
        };

        encode(&header, &claims, &self.key.encoding_key)
            .map_err(|e| CredentialError::Assertion(e.to_string()))
    }

    /// Exchange a client assertion for an access token.
    async fn fetch_new_token(&self) -> Result<AccessToken, CredentialError> {
        let now = Utc::now().timestamp();
        let assertion = self.client_assertion()?;

        let form = [
            ("client_id", self.client_id.as_str()),
            ("scope", GRAPH_SCOPE),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::TokenRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenRequest(format!(
                "HTTP {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::TokenRequest(format!("invalid token response: {e}")))?;

        debug!(expires_in = token.expires_in, "Access token acquired");

        Ok(AccessToken {
            token: SecretString::from(token.access_token),
            expires_at: now + token.expires_in.unwrap_or(3600),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientCertificateCredential {
    async fn access_token(&self) -> Result<SecretString, CredentialError> {
        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| !token.is_expired()) {
            return Ok(token.token.clone());
        }

        let token = self.fetch_new_token().await?;
        let secret = token.token.clone();
        *cached = Some(token);
        Ok(secret)
    }
}

impl fmt::Debug for ClientCertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificateCredential")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("thumbprint", &self.key.thumbprint)
            .finish_non_exhaustive()
    }
}

fn token_url(authority: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        tenant_id
    )
}

/// Read the token out of a secret for an `Authorization` header
pub(crate) fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}
