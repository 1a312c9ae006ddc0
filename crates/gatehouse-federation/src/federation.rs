//! Runtime federation dispatch surface.

use std::fmt;

use crate::oidc::OidcFederation;
use crate::saml2::Saml2Federation;

/// Protocol family of a built federation, used by the initiation and
/// callback handlers to select which operation pair to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationKind {
    Oidc,
    Saml2,
}

impl fmt::Display for FederationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FederationKind::Oidc => f.write_str("oidc"),
            FederationKind::Saml2 => f.write_str("saml2"),
        }
    }
}

/// A live protocol client built from one valid registry entry.
///
/// Created once at manager construction and never mutated afterwards,
/// apart from the internal metadata caches of the clients themselves.
#[derive(Debug)]
pub enum Federation {
    Oidc(OidcFederation),
    Saml2(Saml2Federation),
}

impl Federation {
    /// The registry id this federation was built from.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Federation::Oidc(fed) => fed.id(),
            Federation::Saml2(fed) => fed.id(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FederationKind {
        match self {
            Federation::Oidc(_) => FederationKind::Oidc,
            Federation::Saml2(_) => FederationKind::Saml2,
        }
    }

    #[must_use]
    pub fn as_oidc(&self) -> Option<&OidcFederation> {
        match self {
            Federation::Oidc(fed) => Some(fed),
            Federation::Saml2(_) => None,
        }
    }

    #[must_use]
    pub fn as_saml2(&self) -> Option<&Saml2Federation> {
        match self {
            Federation::Saml2(fed) => Some(fed),
            Federation::Oidc(_) => None,
        }
    }

    /// Namespace a provider-side subject into the local subject space
    /// (`<providerSubject>@<federationId>`), avoiding collisions
    /// between subjects of different providers.
    #[must_use]
    pub fn namespace_subject(&self, provider_subject: &str) -> String {
        format!("{provider_subject}@{}", self.id())
    }
}
