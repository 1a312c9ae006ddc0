//! SAML2 login request construction.

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::error::{FederationError, FederationResult};

use super::metadata::{
    EndpointBinding, SpMetadata, BINDING_POST, BINDING_REDIRECT, BINDING_SIMPLE_SIGN,
};
use super::{Saml2Federation, Saml2LoginRequest};

/// Pick the ACS registration for the outbound request. Fixed priority:
/// simple-sign, then POST, then redirect; the first registered binding
/// wins.
pub(crate) fn negotiate_acs(sp: &SpMetadata) -> FederationResult<&EndpointBinding> {
    for binding in [BINDING_SIMPLE_SIGN, BINDING_POST, BINDING_REDIRECT] {
        if let Some(acs) = sp
            .assertion_consumer_services
            .iter()
            .find(|acs| acs.binding == binding)
        {
            return Ok(acs);
        }
    }
    Err(FederationError::BindingUnsupported)
}

impl Saml2Federation {
    /// Build the login request for this federation. Binding is
    /// negotiated from the SP metadata's ACS registrations; post-class
    /// bindings produce an auto-submitting HTML form (with a
    /// RelayState field only when relay state is present), the
    /// redirect binding produces a ready-to-redirect URL.
    #[instrument(skip(self, relay_state), fields(federation = %self.id()))]
    pub async fn process_login_request(
        &self,
        relay_state: Option<&str>,
    ) -> FederationResult<Saml2LoginRequest> {
        let acs = negotiate_acs(self.sp_metadata())?;
        let idp = self.idp_metadata().await?;

        // Post-class requests go to the IdP's POST SSO endpoint,
        // redirect requests to its redirect endpoint.
        let destination_binding = if acs.binding == BINDING_REDIRECT {
            BINDING_REDIRECT
        } else {
            BINDING_POST
        };
        let sso = idp
            .single_sign_on_services
            .iter()
            .find(|sso| sso.binding == destination_binding)
            .or_else(|| idp.single_sign_on_services.first())
            .ok_or_else(|| {
                FederationError::ConfigurationInvalid(
                    "IdP metadata registers no SingleSignOnService".to_string(),
                )
            })?;

        let xml = self.build_authn_request(&sso.location, acs);

        if acs.binding == BINDING_REDIRECT {
            let deflated = deflate(xml.as_bytes())?;
            let encoded = STANDARD.encode(deflated);
            let mut url = Url::parse(&sso.location).map_err(|err| {
                FederationError::ConfigurationInvalid(format!("invalid SSO endpoint: {err}"))
            })?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("SAMLRequest", &encoded);
                if let Some(relay_state) = relay_state {
                    query.append_pair("RelayState", relay_state);
                }
            }
            Ok(Saml2LoginRequest::Redirect {
                context: url.to_string(),
            })
        } else {
            let encoded = STANDARD.encode(xml.as_bytes());
            let context = auto_submit_form(&sso.location, &encoded, relay_state);
            Ok(Saml2LoginRequest::Post {
                entity_endpoint: sso.location.clone(),
                context,
            })
        }
    }

    fn build_authn_request(&self, destination: &str, acs: &EndpointBinding) -> String {
        let request_id = format!("_{}", Uuid::new_v4());
        let issue_instant = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs_url}" ProtocolBinding="{acs_binding}"><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy Format="urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified" AllowCreate="true"/></samlp:AuthnRequest>"#,
            id = request_id,
            instant = issue_instant,
            destination = xml_escape(destination),
            acs_url = xml_escape(&acs.location),
            acs_binding = xml_escape(&acs.binding),
            issuer = xml_escape(self.sp_entity_id()),
        )
    }
}

fn deflate(data: &[u8]) -> FederationResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|err| {
            FederationError::ConfigurationInvalid(format!("failed to deflate SAMLRequest: {err}"))
        })
}

/// Auto-submitting POST form delivering the request to the IdP. The
/// RelayState input is omitted entirely when relay state is absent.
fn auto_submit_form(action: &str, saml_request: &str, relay_state: Option<&str>) -> String {
    let relay_input = relay_state
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                xml_escape(rs)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>SAML SSO</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="POST" action="{}">
        <input type="hidden" name="SAMLRequest" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        xml_escape(action),
        xml_escape(saml_request),
        relay_input
    )
}

/// Escape for XML attribute values and HTML form values.
fn xml_escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Saml2FederationConfig;
    use crate::saml2::Saml2SchemaValidator;
    use std::sync::Arc;

    struct AcceptAll;

    impl Saml2SchemaValidator for AcceptAll {
        fn validate(&self, _xml: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn sp_metadata_with(bindings: &[&str]) -> String {
        let acs: String = bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                format!(
                    r#"<AssertionConsumerService Binding="{binding}" Location="https://sp.example.com/acs/{index}" index="{index}"/>"#
                )
            })
            .collect();
        format!(
            r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://sp.example.com"><SPSSODescriptor>{acs}</SPSSODescriptor></EntityDescriptor>"#
        )
    }

    const IDP_METADATA: &str = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.com/saml">
  <IDPSSODescriptor>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso/post"/>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/sso/redirect"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#;

    fn federation_with(bindings: &[&str]) -> Saml2Federation {
        let config: Saml2FederationConfig = serde_json::from_value(serde_json::json!({
            "id": "partner",
            "idp": { "metadata": IDP_METADATA },
            "sp": { "entityID": "https://sp.example.com", "metadata": sp_metadata_with(bindings) }
        }))
        .unwrap();
        Saml2Federation::new(config, Arc::new(AcceptAll), false).unwrap()
    }

    #[test]
    fn negotiation_prefers_simple_sign_over_post_over_redirect() {
        let all = federation_with(&[BINDING_REDIRECT, BINDING_POST, BINDING_SIMPLE_SIGN]);
        assert_eq!(
            negotiate_acs(all.sp_metadata()).unwrap().binding,
            BINDING_SIMPLE_SIGN
        );

        let post_and_redirect = federation_with(&[BINDING_REDIRECT, BINDING_POST]);
        assert_eq!(
            negotiate_acs(post_and_redirect.sp_metadata()).unwrap().binding,
            BINDING_POST
        );

        let redirect_only = federation_with(&[BINDING_REDIRECT]);
        assert_eq!(
            negotiate_acs(redirect_only.sp_metadata()).unwrap().binding,
            BINDING_REDIRECT
        );
    }

    #[test]
    fn negotiation_fails_without_registrations() {
        let none = federation_with(&[]);
        assert!(matches!(
            negotiate_acs(none.sp_metadata()),
            Err(FederationError::BindingUnsupported)
        ));
    }

    #[tokio::test]
    async fn post_binding_yields_auto_submit_form() {
        let federation = federation_with(&[BINDING_POST]);
        let request = federation.process_login_request(Some("ctx-42")).await.unwrap();
        assert_eq!(request.kind(), "post");
        let context = request.context();
        assert!(context.contains(r#"action="https://idp.example.com/sso/post""#));
        assert!(context.contains(r#"name="SAMLRequest""#));
        assert!(context.contains(r#"name="RelayState" value="ctx-42""#));
    }

    #[tokio::test]
    async fn relay_state_field_is_omitted_when_absent() {
        let federation = federation_with(&[BINDING_POST]);
        let request = federation.process_login_request(None).await.unwrap();
        assert!(!request.context().contains("RelayState"));
    }

    #[tokio::test]
    async fn redirect_binding_yields_ready_url() {
        let federation = federation_with(&[BINDING_REDIRECT]);
        let request = federation.process_login_request(None).await.unwrap();
        assert_eq!(request.kind(), "redirect");
        let url = Url::parse(request.context()).unwrap();
        assert_eq!(url.path(), "/sso/redirect");
        let (_, encoded) = url
            .query_pairs()
            .find(|(key, _)| key == "SAMLRequest")
            .expect("SAMLRequest parameter");

        // Round-trip: base64 + inflate back to the AuthnRequest XML.
        let raw = STANDARD.decode(encoded.as_bytes()).unwrap();
        let mut decoder = flate2::read::DeflateDecoder::new(&raw[..]);
        let mut xml = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut xml).unwrap();
        assert!(xml.contains("AuthnRequest"));
        assert!(xml.contains(r#"<saml:Issuer>https://sp.example.com</saml:Issuer>"#));
        assert!(xml.contains(r#"Destination="https://idp.example.com/sso/redirect""#));
    }

    #[test]
    fn escaping_covers_markup_characters() {
        assert_eq!(xml_escape(r#"a&b<c>"d'"#), "a&amp;b&lt;c&gt;&quot;d&#39;");
    }
}
