//! SAML2 federation client.
//!
//! Acts as the service provider side of a SAML2 web-SSO exchange:
//! resolves IdP metadata (inline or fetched once from a metadata URL),
//! builds login requests with binding negotiation, and parses
//! responses delivered over the HTTP-POST or HTTP-Redirect binding.

pub(crate) mod metadata;
mod request;
mod response;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::instrument;

use crate::config::Saml2FederationConfig;
use crate::error::{FederationError, FederationResult};
use crate::http;
use metadata::{IdpMetadata, SpMetadata};

/// Caller-supplied SAML protocol schema validator. Its presence at
/// manager construction is what enables SAML2 federations for a
/// deployment; every inbound response is passed through it before
/// extraction.
pub trait Saml2SchemaValidator: Send + Sync {
    fn validate(&self, xml: &str) -> Result<(), String>;
}

/// Transport-neutral view of the inbound callback request. The
/// binding is inferred from the method: POST reads form fields,
/// anything else reads the query string.
#[derive(Debug, Clone)]
pub struct Saml2HttpRequest {
    method: String,
    form: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl Saml2HttpRequest {
    #[must_use]
    pub fn new(
        method: &str,
        form: HashMap<String, String>,
        query: HashMap<String, String>,
    ) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            form,
            query,
        }
    }

    /// A POST-binding request carrying the given form fields.
    #[must_use]
    pub fn post(form: impl IntoIterator<Item = (String, String)>) -> Self {
        Self::new("POST", form.into_iter().collect(), HashMap::new())
    }

    /// A redirect-binding request carrying the given query parameters.
    #[must_use]
    pub fn get(query: impl IntoIterator<Item = (String, String)>) -> Self {
        Self::new("GET", HashMap::new(), query.into_iter().collect())
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn is_post(&self) -> bool {
        self.method == "POST"
    }

    pub(crate) fn form_field(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    pub(crate) fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Outbound login request, tagged with its delivery binding.
#[derive(Debug, Clone)]
pub enum Saml2LoginRequest {
    /// Auto-submitting HTML form targeting the IdP SSO endpoint.
    Post {
        entity_endpoint: String,
        context: String,
    },
    /// Ready-to-redirect URL with the deflated request in the query
    /// string.
    Redirect { context: String },
}

impl Saml2LoginRequest {
    /// Delivery tag for the caller (`post` | `redirect`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Saml2LoginRequest::Post { .. } => "post",
            Saml2LoginRequest::Redirect { .. } => "redirect",
        }
    }

    /// The rendered request context: the HTML form for the POST
    /// binding, the redirect URL otherwise.
    #[must_use]
    pub fn context(&self) -> &str {
        match self {
            Saml2LoginRequest::Post { context, .. }
            | Saml2LoginRequest::Redirect { context } => context,
        }
    }
}

/// Normalized result of one parsed SAML response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Saml2LoginResponse {
    pub name_id: String,
    pub attributes: HashMap<String, Vec<String>>,
    pub relay_state: Option<String>,
}

/// One SAML2 federation, built from a valid registry entry.
///
/// SP metadata is parsed eagerly at construction (an unusable document
/// makes the manager skip the entry). IdP metadata is resolved lazily:
/// inline metadata wins, otherwise the metadata URL is fetched exactly
/// once and cached for the instance's lifetime.
pub struct Saml2Federation {
    config: Saml2FederationConfig,
    validator: Arc<dyn Saml2SchemaValidator>,
    allow_insecure: bool,
    http: reqwest::Client,
    sp_metadata: SpMetadata,
    idp_metadata: OnceCell<IdpMetadata>,
}

impl fmt::Debug for Saml2Federation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saml2Federation")
            .field("id", &self.config.id)
            .field("sp_entity_id", &self.config.sp.entity_id)
            .finish_non_exhaustive()
    }
}

impl Saml2Federation {
    pub(crate) fn new(
        config: Saml2FederationConfig,
        validator: Arc<dyn Saml2SchemaValidator>,
        allow_insecure: bool,
    ) -> FederationResult<Self> {
        let sp_metadata = metadata::parse_sp_metadata(&config.sp.metadata).map_err(|err| {
            FederationError::ConfigurationInvalid(format!("invalid SP metadata: {err}"))
        })?;
        Ok(Self {
            config,
            validator,
            allow_insecure,
            http: http::client(),
            sp_metadata,
            idp_metadata: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    #[must_use]
    pub fn sp_entity_id(&self) -> &str {
        &self.config.sp.entity_id
    }

    pub(crate) fn sp_metadata(&self) -> &SpMetadata {
        &self.sp_metadata
    }

    pub(crate) fn validator(&self) -> &dyn Saml2SchemaValidator {
        self.validator.as_ref()
    }

    /// Resolved IdP metadata: inline configuration, or the document
    /// fetched once from the configured metadata URL. A fetch failure
    /// propagates to the caller and is retried on the next access.
    pub(crate) async fn idp_metadata(&self) -> FederationResult<&IdpMetadata> {
        self.idp_metadata
            .get_or_try_init(|| self.resolve_idp_metadata())
            .await
    }

    #[instrument(skip(self), fields(federation = %self.config.id))]
    async fn resolve_idp_metadata(&self) -> FederationResult<IdpMetadata> {
        let xml = match &self.config.idp.metadata {
            Some(inline) => inline.clone(),
            None => {
                let url = self.config.idp.metadata_url.as_deref().ok_or_else(|| {
                    FederationError::ConfigurationInvalid(
                        "IdP has neither inline metadata nor a metadata URL".to_string(),
                    )
                })?;
                http::validate_endpoint_url(url, self.allow_insecure)
                    .map_err(FederationError::ConfigurationInvalid)?;

                let response = self.http.get(url).send().await?;
                if !response.status().is_success() {
                    return Err(FederationError::Http(format!(
                        "IdP metadata fetch returned HTTP {}",
                        response.status()
                    )));
                }
                response.text().await?
            }
        };

        metadata::parse_idp_metadata(&xml).map_err(|err| {
            FederationError::ConfigurationInvalid(format!("invalid IdP metadata: {err}"))
        })
    }
}
