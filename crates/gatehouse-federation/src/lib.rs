//! Federation protocol engine for gatehouse.
//!
//! This crate lets the authorization server delegate end-user
//! authentication to external identity providers and normalize the
//! result back into its own subject space. Two delegation protocols
//! are supported:
//!
//! - **OpenID Connect** (authorization code + PKCE): discovery,
//!   authorization request construction, callback validation, token
//!   exchange, ID token validation, and UserInfo retrieval.
//! - **SAML2** (HTTP-POST / HTTP-Redirect bindings): IdP/SP metadata
//!   resolution, login request construction with binding negotiation,
//!   and response parsing for both bindings.
//!
//! The [`FederationManager`] turns a declarative registry of provider
//! configurations into live protocol clients, skipping invalid
//! entries. Each [`Federation`] exposes the handshake operations the
//! initiation and callback handlers need; authentication correlation
//! state (`state`, PKCE verifier, relay state) is owned by the caller
//! and round-tripped through its session, never stored here.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = FederationManager::new(Some(registry), Some(validator), false);
//! let federation = manager.get_federation("corp-idp")?;
//! let url = federation
//!     .as_oidc()
//!     .expect("corp-idp is an OIDC federation")
//!     .create_federation_request(&state, Some(&verifier))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod federation;
mod http;
pub mod manager;
pub mod oidc;
pub mod saml2;

pub use config::{
    FederationConfig, FederationRegistry, OidcClientConfig, OidcFederationConfig,
    OidcServerConfig, Saml2FederationConfig, Saml2IdpConfig, Saml2SpConfig,
};
pub use error::{FederationError, FederationResult};
pub use federation::{Federation, FederationKind};
pub use manager::FederationManager;
pub use oidc::OidcFederation;
pub use saml2::{
    Saml2Federation, Saml2HttpRequest, Saml2LoginRequest, Saml2LoginResponse,
    Saml2SchemaValidator,
};
