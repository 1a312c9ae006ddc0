//! Error types for the federation engine.

use thiserror::Error;

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;

/// Federation error taxonomy.
///
/// `ConfigurationInvalid` is recovered locally by the manager (the
/// offending registry entry is skipped); every other error from a
/// client operation propagates unchanged to the caller, which maps it
/// to a user-visible response. No operation retries internally.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Invalid federation configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Federation not found: {0}")]
    NotFound(String),

    #[error("Discovery document for {issuer} is missing required field {field}")]
    MetadataFieldMissing { issuer: String, field: &'static str },

    #[error("Invalid authorization response: {0}")]
    AuthorizationResponseInvalid(String),

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("ID token validation failed: {0}")]
    IdTokenInvalid(String),

    #[error("UserInfo request failed: {0}")]
    UserInfoFailed(String),

    #[error("No supported SAML binding registered in SP metadata")]
    BindingUnsupported,

    #[error("SAML response is missing the SAMLResponse parameter")]
    AssertionMissing,

    #[error("SAML assertion validation failed: {0}")]
    AssertionValidationFailed(String),

    #[error("HTTP request failed: {0}")]
    Http(String),
}

impl From<reqwest::Error> for FederationError {
    fn from(err: reqwest::Error) -> Self {
        FederationError::Http(err.to_string())
    }
}
