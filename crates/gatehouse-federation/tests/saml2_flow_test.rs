//! SAML2 federation flow tests against a mock IdP metadata endpoint.

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gatehouse_federation::{
    FederationConfig, FederationManager, Saml2Federation, Saml2SchemaValidator,
};

struct AcceptAll;

impl Saml2SchemaValidator for AcceptAll {
    fn validate(&self, _xml: &str) -> Result<(), String> {
        Ok(())
    }
}

const SP_METADATA: &str = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://rp.example.com/sp">
  <SPSSODescriptor>
    <AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://rp.example.com/acs" index="0"/>
  </SPSSODescriptor>
</EntityDescriptor>"#;

fn idp_metadata(base: &str) -> String {
    format!(
        r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{base}/saml">
  <IDPSSODescriptor>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{base}/sso"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#
    )
}

fn saml2_entry(id: &str, metadata_url: &str) -> FederationConfig {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "protocol": "saml2",
        "idp": { "metadataUrl": metadata_url },
        "sp": { "entityID": "https://rp.example.com/sp", "metadata": SP_METADATA }
    }))
    .unwrap()
}

fn saml2_federation(manager: &FederationManager) -> &Saml2Federation {
    manager
        .get_federation("partner")
        .unwrap()
        .as_saml2()
        .expect("partner is a SAML2 federation")
}

#[tokio::test]
async fn idp_metadata_url_is_fetched_exactly_once() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(idp_metadata(&base)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = FederationManager::new(
        Some(vec![saml2_entry("partner", &format!("{base}/metadata"))]),
        Some(Arc::new(AcceptAll)),
        true,
    );
    let federation = saml2_federation(&manager);

    // Two login requests, one metadata fetch.
    let first = federation.process_login_request(Some("ctx-1")).await.unwrap();
    let second = federation.process_login_request(None).await.unwrap();
    assert_eq!(first.kind(), "post");
    assert_eq!(second.kind(), "post");
    assert!(first.context().contains(&format!(r#"action="{base}/sso""#)));
}

#[tokio::test]
async fn metadata_fetch_failure_propagates_and_is_retried() {
    let server = MockServer::start().await;
    let base = server.uri();

    let outage = Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    let manager = FederationManager::new(
        Some(vec![saml2_entry("partner", &format!("{base}/metadata"))]),
        Some(Arc::new(AcceptAll)),
        true,
    );
    let federation = saml2_federation(&manager);
    assert!(federation.process_login_request(None).await.is_err());
    drop(outage);

    // A failed fetch is not cached; the next attempt hits the IdP
    // again and succeeds.
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(idp_metadata(&base)))
        .expect(1)
        .mount(&server)
        .await;

    assert!(federation.process_login_request(None).await.is_ok());
}

#[tokio::test]
async fn insecure_metadata_url_is_rejected_by_default() {
    let manager = FederationManager::new(
        Some(vec![saml2_entry("partner", "http://idp.example.com/metadata")]),
        Some(Arc::new(AcceptAll)),
        false,
    );
    let err = saml2_federation(&manager)
        .process_login_request(None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HTTPS"));
}
