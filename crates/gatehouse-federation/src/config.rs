//! Declarative federation registry configuration.
//!
//! A registry is an ordered list of per-provider entries, each a
//! tagged union on `protocol`. Entries come from the deployment's
//! configuration file and use the external camelCase field names.

use serde::{Deserialize, Serialize};

/// Ordered list of federation configurations. An absent registry
/// (`None` at the manager) means "no federations configured".
pub type FederationRegistry = Vec<FederationConfig>;

/// One external-provider configuration, discriminated by `protocol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum FederationConfig {
    Oidc(OidcFederationConfig),
    Saml2(Saml2FederationConfig),
}

impl FederationConfig {
    /// The registry-unique federation id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            FederationConfig::Oidc(cfg) => &cfg.id,
            FederationConfig::Saml2(cfg) => &cfg.id,
        }
    }

    /// Structural validity: each variant must carry its
    /// protocol-required fields as non-empty values.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            FederationConfig::Oidc(cfg) => {
                !cfg.id.is_empty()
                    && !cfg.client.client_id.is_empty()
                    && !cfg.client.redirect_uri.is_empty()
                    && !cfg.server.issuer.is_empty()
            }
            FederationConfig::Saml2(cfg) => {
                let has_idp_metadata = cfg
                    .idp
                    .metadata
                    .as_deref()
                    .is_some_and(|m| !m.is_empty())
                    || cfg
                        .idp
                        .metadata_url
                        .as_deref()
                        .is_some_and(|u| !u.is_empty());
                !cfg.id.is_empty()
                    && has_idp_metadata
                    && !cfg.sp.entity_id.is_empty()
                    && !cfg.sp.metadata.is_empty()
            }
        }
    }
}

/// OIDC federation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcFederationConfig {
    pub id: String,
    pub client: OidcClientConfig,
    pub server: OidcServerConfig,
}

/// Relying-party registration at the external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcClientConfig {
    pub client_id: String,
    /// Absent for public clients; presence selects HTTP Basic client
    /// authentication at the token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// JWS algorithm the provider signs ID tokens with (default RS256).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_signed_response_alg: Option<String>,
    /// Scopes requested on the authorization request; defaults to
    /// `["openid"]` when unspecified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// The external OIDC provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcServerConfig {
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// SAML2 federation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saml2FederationConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub idp: Saml2IdpConfig,
    pub sp: Saml2SpConfig,
}

/// The external identity provider: inline metadata XML or a URL to
/// fetch it from (fetched once, on first use).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Saml2IdpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
}

/// Our service-provider registration at the IdP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Saml2SpConfig {
    #[serde(rename = "entityID")]
    pub entity_id: String,
    /// SP metadata XML; its AssertionConsumerService registrations
    /// drive binding negotiation.
    pub metadata: String,
    #[serde(default)]
    pub authn_requests_signed: bool,
    #[serde(default)]
    pub want_assertions_signed: bool,
}
