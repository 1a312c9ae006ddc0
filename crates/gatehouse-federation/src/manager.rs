//! Federation manager: turns a registry into a lookup table of live
//! protocol clients, tolerating bad entries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{FederationConfig, FederationRegistry};
use crate::error::{FederationError, FederationResult};
use crate::federation::Federation;
use crate::oidc::OidcFederation;
use crate::saml2::{Saml2Federation, Saml2SchemaValidator};

/// Builds and owns the per-deployment federation clients.
///
/// Construction validates every registry entry and instantiates the
/// matching protocol client. Invalid entries are skipped with a
/// warning; they never abort startup. SAML2 entries are built only
/// when a protocol schema validator was supplied, so SAML2 support is
/// opt-in per deployment.
pub struct FederationManager {
    registry: Option<FederationRegistry>,
    federations: HashMap<String, Federation>,
}

impl FederationManager {
    #[must_use]
    pub fn new(
        registry: Option<FederationRegistry>,
        schema_validator: Option<Arc<dyn Saml2SchemaValidator>>,
        allow_insecure: bool,
    ) -> Self {
        let federations =
            Self::build_federations(registry.as_deref(), schema_validator, allow_insecure);
        Self {
            registry,
            federations,
        }
    }

    /// Bounds-check `index` into the registry and structurally
    /// validate the entry. `false` on any failure, including an
    /// absent registry.
    #[must_use]
    pub fn is_configuration_valid(&self, index: usize) -> bool {
        self.registry
            .as_ref()
            .and_then(|registry| registry.get(index))
            .is_some_and(FederationConfig::is_valid)
    }

    fn build_federations(
        registry: Option<&[FederationConfig]>,
        schema_validator: Option<Arc<dyn Saml2SchemaValidator>>,
        allow_insecure: bool,
    ) -> HashMap<String, Federation> {
        let mut federations = HashMap::new();
        let Some(registry) = registry else {
            return federations;
        };

        for config in registry {
            if !config.is_valid() {
                warn!(
                    federation_id = %config.id(),
                    "Skipping structurally invalid federation configuration"
                );
                continue;
            }

            let federation = match config {
                FederationConfig::Oidc(cfg) => {
                    Federation::Oidc(OidcFederation::new(cfg.clone(), allow_insecure))
                }
                FederationConfig::Saml2(cfg) => {
                    let Some(validator) = schema_validator.clone() else {
                        debug!(
                            federation_id = %cfg.id,
                            "Skipping SAML2 federation: no schema validator supplied"
                        );
                        continue;
                    };
                    match Saml2Federation::new(cfg.clone(), validator, allow_insecure) {
                        Ok(fed) => Federation::Saml2(fed),
                        Err(err) => {
                            warn!(
                                federation_id = %cfg.id,
                                error = %err,
                                "Skipping SAML2 federation with unusable metadata"
                            );
                            continue;
                        }
                    }
                }
            };

            debug!(
                federation_id = %federation.id(),
                kind = %federation.kind(),
                "Built federation client"
            );
            federations.insert(federation.id().to_string(), federation);
        }

        federations
    }

    /// Exact-match lookup by federation id.
    pub fn get_federation(&self, id: &str) -> FederationResult<&Federation> {
        self.federations
            .get(id)
            .ok_or_else(|| FederationError::NotFound(id.to_string()))
    }

    /// The original registry, unchanged.
    #[must_use]
    pub fn configurations(&self) -> Option<&[FederationConfig]> {
        self.registry.as_deref()
    }

    /// Iterate the built federations.
    pub fn federations(&self) -> impl Iterator<Item = &Federation> {
        self.federations.values()
    }

    /// Number of federations that were actually built.
    #[must_use]
    pub fn len(&self) -> usize {
        self.federations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.federations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::FederationKind;

    struct AcceptAll;

    impl Saml2SchemaValidator for AcceptAll {
        fn validate(&self, _xml: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn oidc_entry(id: &str) -> FederationConfig {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "protocol": "oidc",
            "client": { "clientId": "c1", "redirectUri": "https://a/cb" },
            "server": { "issuer": "https://idp" }
        }))
        .unwrap()
    }

    fn saml2_entry(id: &str) -> FederationConfig {
        let sp_metadata = r#"<EntityDescriptor entityID="https://a/sp" xmlns="urn:oasis:names:tc:SAML:2.0:metadata">
  <SPSSODescriptor>
    <AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://a/acs" index="0"/>
  </SPSSODescriptor>
</EntityDescriptor>"#;
        let idp_metadata = r#"<EntityDescriptor entityID="https://idp/saml" xmlns="urn:oasis:names:tc:SAML:2.0:metadata">
  <IDPSSODescriptor>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp/sso"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#;
        serde_json::from_value(serde_json::json!({
            "id": id,
            "protocol": "saml2",
            "idp": { "metadata": idp_metadata },
            "sp": { "entityID": "https://a/sp", "metadata": sp_metadata }
        }))
        .unwrap()
    }

    #[test]
    fn builds_one_federation_per_valid_entry() {
        let manager = FederationManager::new(
            Some(vec![oidc_entry("fed1"), oidc_entry("fed2")]),
            None,
            false,
        );
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn single_oidc_entry_scenario() {
        let manager = FederationManager::new(Some(vec![oidc_entry("fed1")]), None, false);
        assert_eq!(manager.len(), 1);
        let federation = manager.get_federation("fed1").unwrap();
        assert_eq!(federation.kind(), FederationKind::Oidc);
        assert_eq!(federation.id(), "fed1");
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let invalid: FederationConfig = serde_json::from_value(serde_json::json!({
            "id": "broken",
            "protocol": "oidc",
            "client": { "clientId": "", "redirectUri": "https://a/cb" },
            "server": { "issuer": "https://idp" }
        }))
        .unwrap();
        let manager =
            FederationManager::new(Some(vec![invalid, oidc_entry("fed1")]), None, false);
        assert_eq!(manager.len(), 1);
        assert!(manager.get_federation("broken").is_err());
    }

    #[test]
    fn saml2_requires_a_schema_validator() {
        let registry = vec![oidc_entry("fed1"), saml2_entry("partner")];

        let without = FederationManager::new(Some(registry.clone()), None, false);
        assert_eq!(without.len(), 1);

        let with =
            FederationManager::new(Some(registry), Some(Arc::new(AcceptAll)), false);
        assert_eq!(with.len(), 2);
        assert_eq!(
            with.get_federation("partner").unwrap().kind(),
            FederationKind::Saml2
        );
    }

    #[test]
    fn absent_registry_builds_empty_map() {
        let manager = FederationManager::new(None, None, false);
        assert!(manager.is_empty());
        assert!(manager.configurations().is_none());
        assert!(!manager.is_configuration_valid(0));
    }

    #[test]
    fn unknown_id_fails_with_not_found_naming_the_id() {
        let manager = FederationManager::new(Some(vec![oidc_entry("fed1")]), None, false);
        let err = manager.get_federation("missing").unwrap_err();
        assert!(matches!(err, FederationError::NotFound(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn is_configuration_valid_bounds_checks() {
        let manager = FederationManager::new(Some(vec![oidc_entry("fed1")]), None, false);
        assert!(manager.is_configuration_valid(0));
        assert!(!manager.is_configuration_valid(1));
    }

    #[test]
    fn configurations_returns_registry_unchanged() {
        let registry = vec![oidc_entry("fed1"), saml2_entry("partner")];
        let manager = FederationManager::new(Some(registry), None, false);
        let configs = manager.configurations().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].id(), "fed1");
        assert_eq!(configs[1].id(), "partner");
    }

    #[test]
    fn subject_namespacing_suffixes_the_federation_id() {
        let manager = FederationManager::new(Some(vec![oidc_entry("fed1")]), None, false);
        let federation = manager.get_federation("fed1").unwrap();
        assert_eq!(federation.namespace_subject("user-9"), "user-9@fed1");
    }
}
