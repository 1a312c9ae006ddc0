//! OIDC federation client.
//!
//! Drives one authorization-code + PKCE handshake against an external
//! OpenID provider: discovery, authorization request construction,
//! callback validation, token exchange, ID token validation, and
//! UserInfo retrieval. The `state` parameter and PKCE verifier are
//! generated and stored by the caller; this client only forwards and
//! checks them.

pub mod jwks;
pub mod metadata;

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::OidcFederationConfig;
use crate::error::{FederationError, FederationResult};
use crate::http;
use jwks::JwkSet;
use metadata::ServerMetadata;

/// Scopes requested when the configuration does not specify any.
const DEFAULT_SCOPES: &[&str] = &["openid"];

/// Token response from the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Validated authorization-callback parameters, ready for token
/// exchange.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
    pub iss: Option<String>,
}

/// Claims of a validated ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: serde_json::Value,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Normalized identity returned by the UserInfo endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(flatten)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Compute the `S256` PKCE code challenge for a verifier.
#[must_use]
pub fn pkce_challenge_s256(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// One OIDC federation, built from a valid registry entry.
///
/// The discovery document and JWKS are each fetched at most once per
/// instance and cached for its lifetime; concurrent first accesses
/// share a single in-flight fetch.
#[derive(Debug)]
pub struct OidcFederation {
    config: OidcFederationConfig,
    allow_insecure: bool,
    http: reqwest::Client,
    metadata: OnceCell<ServerMetadata>,
    jwks: OnceCell<JwkSet>,
}

impl OidcFederation {
    pub(crate) fn new(config: OidcFederationConfig, allow_insecure: bool) -> Self {
        Self {
            config,
            allow_insecure,
            http: http::client(),
            metadata: OnceCell::new(),
            jwks: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.server.issuer
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.config.client.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.config.client.client_secret.as_deref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.config.client.redirect_uri
    }

    /// Configured scopes, or the default scope list.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        match &self.config.client.scopes {
            Some(scopes) => scopes.iter().map(String::as_str).collect(),
            None => DEFAULT_SCOPES.to_vec(),
        }
    }

    /// The provider's discovery document, fetched lazily exactly once
    /// for this instance.
    pub async fn server_metadata(&self) -> FederationResult<&ServerMetadata> {
        self.metadata
            .get_or_try_init(|| self.fetch_server_metadata())
            .await
    }

    #[instrument(skip(self), fields(federation = %self.config.id, issuer = %self.config.server.issuer))]
    async fn fetch_server_metadata(&self) -> FederationResult<ServerMetadata> {
        http::validate_endpoint_url(self.issuer(), self.allow_insecure)
            .map_err(FederationError::ConfigurationInvalid)?;

        let url = metadata::well_known_url(self.issuer());
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FederationError::Http(format!(
                "discovery request returned HTTP {}",
                response.status()
            )));
        }
        let metadata: ServerMetadata = response
            .json()
            .await
            .map_err(|err| FederationError::Http(format!("malformed discovery document: {err}")))?;

        debug!(
            authorization_endpoint = ?metadata.authorization_endpoint,
            token_endpoint = ?metadata.token_endpoint,
            "Fetched discovery document"
        );
        Ok(metadata)
    }

    async fn metadata_field(
        &self,
        field: &'static str,
        get: for<'a> fn(&'a ServerMetadata) -> Option<&'a str>,
    ) -> FederationResult<&str> {
        let metadata = self.server_metadata().await?;
        get(metadata).ok_or_else(|| FederationError::MetadataFieldMissing {
            issuer: self.issuer().to_string(),
            field,
        })
    }

    pub async fn authorization_endpoint(&self) -> FederationResult<&str> {
        self.metadata_field("authorization_endpoint", |m| {
            m.authorization_endpoint.as_deref()
        })
        .await
    }

    pub async fn token_endpoint(&self) -> FederationResult<&str> {
        self.metadata_field("token_endpoint", |m| m.token_endpoint.as_deref())
            .await
    }

    pub async fn userinfo_endpoint(&self) -> FederationResult<&str> {
        self.metadata_field("userinfo_endpoint", |m| m.userinfo_endpoint.as_deref())
            .await
    }

    pub async fn jwks_uri(&self) -> FederationResult<&str> {
        self.metadata_field("jwks_uri", |m| m.jwks_uri.as_deref()).await
    }

    /// Whether the provider echoes `iss` on authorization responses.
    /// Optional metadata field; absent means `false`.
    pub async fn iss_parameter_supported(&self) -> FederationResult<bool> {
        Ok(self
            .server_metadata()
            .await?
            .authorization_response_iss_parameter_supported)
    }

    /// Construct the provider authorization URL for one authentication
    /// attempt. PKCE (`S256`) is applied iff a code verifier is
    /// supplied; `state` is forwarded verbatim for later correlation.
    #[instrument(skip(self, state, code_verifier), fields(federation = %self.config.id))]
    pub async fn create_federation_request(
        &self,
        state: &str,
        code_verifier: Option<&str>,
    ) -> FederationResult<Url> {
        let endpoint = self.authorization_endpoint().await?.to_string();
        let mut url = Url::parse(&endpoint).map_err(|err| {
            FederationError::ConfigurationInvalid(format!("invalid authorization endpoint: {err}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", self.client_id());
            query.append_pair("redirect_uri", self.redirect_uri());
            query.append_pair("scope", &self.scopes().join(" "));
            query.append_pair("state", state);
            if let Some(verifier) = code_verifier {
                query.append_pair("code_challenge", &pkce_challenge_s256(verifier));
                query.append_pair("code_challenge_method", "S256");
            }
        }

        Ok(url)
    }

    /// Validate the authorization callback and return the raw
    /// parameter set for token exchange. Provider errors, a missing or
    /// mismatched `state` echo, a missing code, and an `iss` mismatch
    /// (when the provider advertises the `iss` parameter) all fail
    /// with `AuthorizationResponseInvalid`.
    pub async fn extract_authorization_code(
        &self,
        callback_url: &str,
        expected_state: &str,
    ) -> FederationResult<CallbackParams> {
        let url = Url::parse(callback_url).map_err(|err| {
            FederationError::AuthorizationResponseInvalid(format!("malformed callback URL: {err}"))
        })?;

        let mut code = None;
        let mut state = None;
        let mut iss = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match &*key {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "iss" => iss = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            warn!(
                federation_id = %self.config.id,
                provider_error = ?error,
                "Provider returned an authorization error"
            );
            return Err(FederationError::AuthorizationResponseInvalid(format!(
                "provider returned error: {error}"
            )));
        }

        match state.as_deref() {
            Some(echoed) if echoed == expected_state => {}
            Some(_) => {
                return Err(FederationError::AuthorizationResponseInvalid(
                    "state mismatch".to_string(),
                ))
            }
            None => {
                return Err(FederationError::AuthorizationResponseInvalid(
                    "missing state parameter".to_string(),
                ))
            }
        }

        if self.iss_parameter_supported().await? {
            match iss.as_deref() {
                Some(echoed) if echoed == self.issuer() => {}
                Some(_) => {
                    return Err(FederationError::AuthorizationResponseInvalid(
                        "iss mismatch".to_string(),
                    ))
                }
                None => {
                    return Err(FederationError::AuthorizationResponseInvalid(
                        "missing iss parameter".to_string(),
                    ))
                }
            }
        }

        let code = code.ok_or_else(|| {
            FederationError::AuthorizationResponseInvalid(
                "missing authorization code".to_string(),
            )
        })?;

        Ok(CallbackParams {
            code,
            state: expected_state.to_string(),
            iss,
        })
    }

    /// Exchange the authorization code at the token endpoint. Client
    /// authentication is HTTP Basic when a secret is configured,
    /// otherwise the public-client form. The response must carry an ID
    /// token.
    #[instrument(skip(self, params, code_verifier), fields(federation = %self.config.id))]
    pub async fn make_token_request(
        &self,
        params: &CallbackParams,
        code_verifier: Option<&str>,
    ) -> FederationResult<TokenResponse> {
        let endpoint = self.token_endpoint().await?.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", &params.code),
            ("redirect_uri", self.redirect_uri()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let request = match self.client_secret() {
            Some(secret) => self
                .http
                .post(&endpoint)
                .basic_auth(self.client_id(), Some(secret)),
            None => {
                form.push(("client_id", self.client_id()));
                self.http.post(&endpoint)
            }
        };

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|err| FederationError::TokenExchangeFailed(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                federation_id = %self.config.id,
                status = %status,
                error = %http::truncate_for_log(&body),
                "Token exchange failed"
            );
            // Never pass the raw provider response to the caller.
            return Err(FederationError::TokenExchangeFailed(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| FederationError::TokenExchangeFailed(err.to_string()))?;

        if token.id_token.is_none() {
            return Err(FederationError::TokenExchangeFailed(
                "token response did not include an ID token".to_string(),
            ));
        }

        Ok(token)
    }

    async fn jwks(&self) -> FederationResult<&JwkSet> {
        self.jwks
            .get_or_try_init(|| async {
                let uri = self.jwks_uri().await?.to_string();
                let response = self.http.get(&uri).send().await?;
                if !response.status().is_success() {
                    return Err(FederationError::Http(format!(
                        "JWKS request returned HTTP {}",
                        response.status()
                    )));
                }
                response
                    .json::<JwkSet>()
                    .await
                    .map_err(|err| FederationError::Http(format!("malformed JWKS: {err}")))
            })
            .await
    }

    /// Validate the ID token's signature and claims against the
    /// configured issuer and client id. `None` when the token response
    /// carries no ID token.
    pub async fn validate_id_token(
        &self,
        token: &TokenResponse,
    ) -> FederationResult<Option<IdTokenClaims>> {
        let Some(id_token) = token.id_token.as_deref() else {
            return Ok(None);
        };

        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|err| FederationError::IdTokenInvalid(err.to_string()))?;

        let jwks = self.jwks().await?;
        let jwk = jwks
            .find_signing_key(header.kid.as_deref())
            .ok_or_else(|| {
                FederationError::IdTokenInvalid("no matching signing key in JWKS".to_string())
            })?;
        let key = jwk.decoding_key()?;

        let algorithm = jwks::signing_algorithm(
            self.config.client.id_token_signed_response_alg.as_deref(),
        )?;
        let mut validation = jsonwebtoken::Validation::new(algorithm);
        validation.set_issuer(&[self.issuer()]);
        validation.set_audience(&[self.client_id()]);

        let data = jsonwebtoken::decode::<IdTokenClaims>(id_token, &key, &validation)
            .map_err(|err| FederationError::IdTokenInvalid(err.to_string()))?;

        Ok(Some(data.claims))
    }

    /// Fetch and validate the UserInfo response. The subject check is
    /// skipped entirely when `expected_subject` is absent.
    #[instrument(skip(self, access_token, expected_subject), fields(federation = %self.config.id))]
    pub async fn make_user_info_request(
        &self,
        access_token: &str,
        expected_subject: Option<&str>,
    ) -> FederationResult<UserInfo> {
        let endpoint = self.userinfo_endpoint().await?.to_string();
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| FederationError::UserInfoFailed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FederationError::UserInfoFailed(format!(
                "userinfo endpoint returned HTTP {}",
                response.status()
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|err| FederationError::UserInfoFailed(err.to_string()))?;

        if let Some(expected) = expected_subject {
            if info.sub != expected {
                return Err(FederationError::UserInfoFailed(
                    "subject mismatch between ID token and UserInfo response".to_string(),
                ));
            }
        }

        Ok(info)
    }

    /// The composed callback pipeline: extract the code, exchange it,
    /// validate the ID token, and fetch UserInfo bound to the ID
    /// token's subject. Any stage failure propagates unmodified.
    #[instrument(skip_all, fields(federation = %self.config.id))]
    pub async fn process_federation_response(
        &self,
        callback_url: &str,
        state: &str,
        code_verifier: Option<&str>,
    ) -> FederationResult<UserInfo> {
        let params = self.extract_authorization_code(callback_url, state).await?;
        let tokens = self.make_token_request(&params, code_verifier).await?;
        let claims = self.validate_id_token(&tokens).await?;
        let expected_subject = claims.as_ref().map(|c| c.sub.clone());
        let info = self
            .make_user_info_request(&tokens.access_token, expected_subject.as_deref())
            .await?;

        tracing::info!(
            federation_id = %self.config.id,
            subject = %info.sub,
            "Completed federated authentication"
        );
        Ok(info)
    }
}
