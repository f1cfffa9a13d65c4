/*!
 * Credential providers for object storage
 *
 * The relay pipeline never looks inside a credential; it only hands the
 * provider to the store client at construction time.
 */

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Credential lookup failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credentials available: {0}")]
    Missing(String),

    #[error("credentials rejected: {0}")]
    Invalid(String),
}

/// Access key pair for an S3-compatible store. Secret parts are redacted
/// from `Debug` output.
#[derive(Debug, Clone)]
pub struct Credential {
    access_key: String,
    secret_key: SecretString,
    session_token: Option<SecretString>,
}

impl Credential {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: SecretString::new(secret_key.into().into_boxed_str()),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(SecretString::new(token.into().into_boxed_str()));
        self
    }

    pub(crate) fn access_key(&self) -> &str {
        &self.access_key
    }

    pub(crate) fn secret_key(&self) -> &SecretString {
        &self.secret_key
    }

    pub(crate) fn session_token(&self) -> Option<&SecretString> {
        self.session_token.as_ref()
    }
}

/// Source of valid store credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential, AuthError>;
}

/// Fixed credentials, typically read from the config file
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credential);

impl StaticCredentials {
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<Credential, AuthError> {
        if self.0.access_key.is_empty() || self.0.secret_key.expose_secret().is_empty() {
            return Err(AuthError::Invalid("empty access or secret key".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Credentials read from the environment on every request.
///
/// `FERRY_ACCESS_KEY`/`FERRY_SECRET_KEY` take precedence over the standard
/// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` pair.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn lookup(primary: &str, fallback: &str) -> Option<String> {
        std::env::var(primary)
            .ok()
            .or_else(|| std::env::var(fallback).ok())
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credential(&self) -> Result<Credential, AuthError> {
        let access_key = Self::lookup("FERRY_ACCESS_KEY", "AWS_ACCESS_KEY_ID")
            .ok_or_else(|| AuthError::Missing("access key not set".to_string()))?;
        let secret_key = Self::lookup("FERRY_SECRET_KEY", "AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| AuthError::Missing("secret key not set".to_string()))?;

        let credential = Credential::new(access_key, secret_key);
        Ok(match std::env::var("AWS_SESSION_TOKEN") {
            Ok(token) if !token.is_empty() => credential.with_session_token(token),
            _ => credential,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let cred = Credential::new("AKIAEXAMPLE", "super-secret").with_session_token("tok");
        let rendered = format!("{:?}", cred);
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("\"tok\""));
        assert!(rendered.contains("REDACTED"));

        let provider = format!("{:?}", StaticCredentials::new(cred));
        assert!(!provider.contains("super-secret"));
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let provider = StaticCredentials::new(Credential::new("ak", "sk"));
        let cred = provider.credential().await.unwrap();
        assert_eq!(cred.access_key(), "ak");
        assert_eq!(cred.secret_key().expose_secret(), "sk");
        assert!(cred.session_token().is_none());
    }

    #[tokio::test]
    async fn test_static_credentials_rejects_empty() {
        let provider = StaticCredentials::new(Credential::new("", "sk"));
        assert!(matches!(
            provider.credential().await,
            Err(AuthError::Invalid(_))
        ));
    }
}
