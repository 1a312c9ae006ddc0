//! SAML2 metadata parsing.
//!
//! Pulls the binding registrations out of SP and IdP metadata
//! documents: AssertionConsumerService entries on the SP side (they
//! drive login-request binding negotiation) and SingleSignOnService
//! entries on the IdP side (they give the request destination).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub(crate) const BINDING_SIMPLE_SIGN: &str =
    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST-SimpleSign";
pub(crate) const BINDING_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub(crate) const BINDING_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// One service registration: a binding URN and its endpoint location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EndpointBinding {
    pub binding: String,
    pub location: String,
}

/// Parsed SP metadata.
#[derive(Debug, Clone)]
pub(crate) struct SpMetadata {
    pub entity_id: Option<String>,
    pub assertion_consumer_services: Vec<EndpointBinding>,
}

/// Parsed IdP metadata.
#[derive(Debug, Clone)]
pub(crate) struct IdpMetadata {
    pub entity_id: Option<String>,
    pub single_sign_on_services: Vec<EndpointBinding>,
}

pub(crate) fn parse_sp_metadata(xml: &str) -> Result<SpMetadata, String> {
    let (entity_id, services) = parse_entity_services(xml, "AssertionConsumerService")?;
    Ok(SpMetadata {
        entity_id,
        assertion_consumer_services: services,
    })
}

pub(crate) fn parse_idp_metadata(xml: &str) -> Result<IdpMetadata, String> {
    let (entity_id, services) = parse_entity_services(xml, "SingleSignOnService")?;
    Ok(IdpMetadata {
        entity_id,
        single_sign_on_services: services,
    })
}

/// Walk an EntityDescriptor and collect every `service_element` with
/// both a Binding and a Location attribute.
fn parse_entity_services(
    xml: &str,
    service_element: &str,
) -> Result<(Option<String>, Vec<EndpointBinding>), String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entity_id = None;
    let mut services = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let name = e.local_name();
                let name = std::str::from_utf8(name.as_ref()).unwrap_or("");
                if name == "EntityDescriptor" {
                    if let Some(value) = attribute_value(&e, b"entityID") {
                        entity_id = Some(value);
                    }
                } else if name == service_element {
                    let binding = attribute_value(&e, b"Binding");
                    let location = attribute_value(&e, b"Location");
                    if let (Some(binding), Some(location)) = (binding, location) {
                        services.push(EndpointBinding { binding, location });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {e}")),
            _ => {}
        }
    }

    Ok((entity_id, services))
}

fn attribute_value(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| attr.unescape_value().unwrap_or_default().to_string())
}
