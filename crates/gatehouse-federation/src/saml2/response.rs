//! SAML2 response parsing.
//!
//! Decodes the `SAMLResponse` payload from either binding, runs it
//! through the deployment's schema validator, and extracts the NameID
//! and attribute statements into a [`Saml2LoginResponse`].

use std::collections::HashMap;
use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{instrument, warn};

use crate::error::{FederationError, FederationResult};
use crate::http;

use super::{Saml2Federation, Saml2HttpRequest, Saml2LoginResponse};

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Upper bound on the decoded response, before and after inflation.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

impl Saml2Federation {
    /// Parse an inbound response delivered to the ACS endpoint. The
    /// binding follows the request method: POST reads the form body,
    /// anything else reads the query string (redirect binding, with
    /// the payload deflated before base64).
    #[instrument(skip(self, request), fields(federation = %self.id(), method = %request.method()))]
    pub async fn process_saml2_response(
        &self,
        request: &Saml2HttpRequest,
    ) -> FederationResult<Saml2LoginResponse> {
        let (xml, relay_state) = if request.is_post() {
            let payload = request
                .form_field("SAMLResponse")
                .ok_or(FederationError::AssertionMissing)?;
            (
                decode_post_payload(payload)?,
                request.form_field("RelayState").map(str::to_string),
            )
        } else {
            let payload = request
                .query_param("SAMLResponse")
                .ok_or(FederationError::AssertionMissing)?;
            (
                decode_redirect_payload(payload)?,
                request.query_param("RelayState").map(str::to_string),
            )
        };

        let mut response = self.parse_login_response(&xml).await?;
        response.relay_state = relay_state;
        Ok(response)
    }

    async fn parse_login_response(&self, xml: &str) -> FederationResult<Saml2LoginResponse> {
        if let Err(reason) = self.validator().validate(xml) {
            warn!(
                federation = %self.id(),
                reason = %reason,
                payload = %http::truncate_for_log(xml),
                "SAML response rejected by schema validator"
            );
            return Err(FederationError::AssertionValidationFailed(reason));
        }

        let extracted = extract_login_response(xml)?;

        if extracted.status_code.as_deref() != Some(STATUS_SUCCESS) {
            return Err(FederationError::AssertionValidationFailed(format!(
                "IdP returned non-success status: {}",
                extracted.status_code.as_deref().unwrap_or("(absent)")
            )));
        }

        // The response issuer must be the IdP we built this federation
        // against.
        let idp = self.idp_metadata().await?;
        if let (Some(issuer), Some(expected)) = (&extracted.issuer, &idp.entity_id) {
            if issuer != expected {
                return Err(FederationError::AssertionValidationFailed(format!(
                    "response issuer {issuer} does not match IdP entity {expected}"
                )));
            }
        }

        let name_id = extracted.name_id.ok_or_else(|| {
            FederationError::AssertionValidationFailed("assertion carries no NameID".to_string())
        })?;

        Ok(Saml2LoginResponse {
            name_id,
            attributes: extracted.attributes,
            relay_state: None,
        })
    }
}

/// POST binding: plain base64.
fn decode_post_payload(payload: &str) -> FederationResult<String> {
    let raw = STANDARD.decode(payload.trim()).map_err(|err| {
        FederationError::AssertionValidationFailed(format!("SAMLResponse is not base64: {err}"))
    })?;
    if raw.len() > MAX_RESPONSE_BYTES {
        return Err(FederationError::AssertionValidationFailed(format!(
            "SAMLResponse exceeds {MAX_RESPONSE_BYTES} bytes"
        )));
    }
    String::from_utf8(raw).map_err(|err| {
        FederationError::AssertionValidationFailed(format!("SAMLResponse is not UTF-8: {err}"))
    })
}

/// Redirect binding: base64 over a raw-deflated document. Some IdPs
/// skip the deflate step on this binding, so a payload that already
/// decodes to UTF-8 XML is accepted as-is.
fn decode_redirect_payload(payload: &str) -> FederationResult<String> {
    let raw = STANDARD.decode(payload.trim()).map_err(|err| {
        FederationError::AssertionValidationFailed(format!("SAMLResponse is not base64: {err}"))
    })?;
    if raw.len() > MAX_RESPONSE_BYTES {
        return Err(FederationError::AssertionValidationFailed(format!(
            "SAMLResponse exceeds {MAX_RESPONSE_BYTES} bytes"
        )));
    }

    let mut decoder = flate2::read::DeflateDecoder::new(&raw[..]).take(MAX_RESPONSE_BYTES as u64);
    let mut inflated = String::new();
    match decoder.read_to_string(&mut inflated) {
        Ok(_) => Ok(inflated),
        Err(inflate_err) => match String::from_utf8(raw) {
            Ok(xml) if xml.trim_start().starts_with('<') => Ok(xml),
            _ => Err(FederationError::AssertionValidationFailed(format!(
                "SAMLResponse failed to inflate: {inflate_err}"
            ))),
        },
    }
}

/// Only the first StatusCode counts; nested codes refine the top-level
/// one and must not mask a failure.
fn record_status_code(
    element: &quick_xml::events::BytesStart<'_>,
    extracted: &mut ExtractedResponse,
) {
    if extracted.status_code.is_none() {
        extracted.status_code = element
            .attributes()
            .flatten()
            .find(|attr| attr.key.as_ref() == b"Value")
            .map(|attr| attr.unescape_value().unwrap_or_default().to_string());
    }
}

#[derive(Debug, Default)]
struct ExtractedResponse {
    issuer: Option<String>,
    status_code: Option<String>,
    name_id: Option<String>,
    attributes: HashMap<String, Vec<String>>,
}

/// Walk the response document and collect the Issuer, top-level
/// StatusCode, the subject NameID, and every AttributeStatement
/// attribute with its values.
fn extract_login_response(xml: &str) -> FederationResult<ExtractedResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut extracted = ExtractedResponse::default();
    let mut in_issuer = false;
    let mut in_name_id = false;
    let mut in_attribute_value = false;
    let mut current_attribute: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"Issuer" => in_issuer = true,
                    b"NameID" => in_name_id = true,
                    b"Attribute" => {
                        current_attribute = e
                            .attributes()
                            .flatten()
                            .find(|attr| attr.key.as_ref() == b"Name")
                            .map(|attr| attr.unescape_value().unwrap_or_default().to_string());
                        if let Some(name) = &current_attribute {
                            extracted.attributes.entry(name.clone()).or_default();
                        }
                    }
                    b"AttributeValue" => in_attribute_value = current_attribute.is_some(),
                    b"StatusCode" => record_status_code(&e, &mut extracted),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"StatusCode" {
                    record_status_code(&e, &mut extracted);
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| {
                        FederationError::AssertionValidationFailed(format!(
                            "XML parse error: {err}"
                        ))
                    })?
                    .to_string();
                if in_issuer {
                    // Response-level Issuer only; the assertion repeats
                    // it later.
                    if extracted.issuer.is_none() {
                        extracted.issuer = Some(value);
                    }
                } else if in_name_id {
                    if extracted.name_id.is_none() {
                        extracted.name_id = Some(value);
                    }
                } else if in_attribute_value {
                    if let Some(name) = &current_attribute {
                        extracted
                            .attributes
                            .entry(name.clone())
                            .or_default()
                            .push(value);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"Issuer" => in_issuer = false,
                    b"NameID" => in_name_id = false,
                    b"AttributeValue" => in_attribute_value = false,
                    b"Attribute" => current_attribute = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(FederationError::AssertionValidationFailed(format!(
                    "XML parse error: {err}"
                )));
            }
            _ => {}
        }
    }

    Ok(extracted)
}
