//! OIDC discovery document model.

use serde::Deserialize;

/// The provider's discovery document, as fetched from the well-known
/// configuration endpoint. Every field is optional at the wire level;
/// required-field policy is applied by the accessors on
/// [`crate::oidc::OidcFederation`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// RFC 9207: the provider echoes `iss` on authorization responses.
    #[serde(default)]
    pub authorization_response_iss_parameter_supported: bool,
}

/// Well-known configuration URL for an issuer.
#[must_use]
pub fn well_known_url(issuer: &str) -> String {
    let issuer = issuer.trim_end_matches('/');
    format!("{issuer}/.well-known/openid-configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_url_normalizes_trailing_slash() {
        assert_eq!(
            well_known_url("https://idp.example.com"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            well_known_url("https://idp.example.com/"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn iss_parameter_flag_defaults_to_false() {
        let metadata: ServerMetadata = serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize"
        }))
        .unwrap();
        assert!(!metadata.authorization_response_iss_parameter_supported);
        assert!(metadata.token_endpoint.is_none());
    }
}
