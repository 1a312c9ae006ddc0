//! JWKS model and ID token signing key selection.

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;

use crate::error::{FederationError, FederationResult};

/// JSON Web Key Set published at the provider's `jwks_uri`.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// A single published key. Only the members needed to build a
/// verification key are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default, rename = "use")]
    pub use_: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    // RSA
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // EC
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

impl JwkSet {
    /// Select the signing key for a token: by `kid` when the token
    /// header carries one, otherwise the first non-encryption key.
    #[must_use]
    pub fn find_signing_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None => self.keys.iter().find(|k| k.use_.as_deref() != Some("enc")),
        }
    }
}

impl Jwk {
    /// Build a verification key from the published components.
    pub fn decoding_key(&self) -> FederationResult<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let (Some(n), Some(e)) = (self.n.as_deref(), self.e.as_deref()) else {
                    return Err(FederationError::IdTokenInvalid(
                        "RSA key is missing n/e components".to_string(),
                    ));
                };
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| FederationError::IdTokenInvalid(err.to_string()))
            }
            "EC" => {
                let (Some(x), Some(y)) = (self.x.as_deref(), self.y.as_deref()) else {
                    return Err(FederationError::IdTokenInvalid(
                        "EC key is missing x/y components".to_string(),
                    ));
                };
                DecodingKey::from_ec_components(x, y)
                    .map_err(|err| FederationError::IdTokenInvalid(err.to_string()))
            }
            other => Err(FederationError::IdTokenInvalid(format!(
                "unsupported key type: {other}"
            ))),
        }
    }
}

/// Map the configured `id_token_signed_response_alg` to a JWS
/// algorithm. Defaults to RS256 when unconfigured.
pub(crate) fn signing_algorithm(name: Option<&str>) -> FederationResult<Algorithm> {
    match name.unwrap_or("RS256") {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "PS256" => Ok(Algorithm::PS256),
        "PS384" => Ok(Algorithm::PS384),
        "PS512" => Ok(Algorithm::PS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        other => Err(FederationError::IdTokenInvalid(format!(
            "unsupported ID token algorithm: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwks() -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [
                { "kty": "RSA", "kid": "enc-1", "use": "enc", "n": "AQ", "e": "AQAB" },
                { "kty": "RSA", "kid": "sig-1", "use": "sig", "n": "AQ", "e": "AQAB" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn finds_key_by_kid() {
        let set = jwks();
        assert_eq!(
            set.find_signing_key(Some("sig-1")).unwrap().kid.as_deref(),
            Some("sig-1")
        );
        assert!(set.find_signing_key(Some("absent")).is_none());
    }

    #[test]
    fn skips_encryption_keys_when_no_kid_given() {
        let set = jwks();
        assert_eq!(
            set.find_signing_key(None).unwrap().kid.as_deref(),
            Some("sig-1")
        );
    }

    #[test]
    fn algorithm_defaults_to_rs256() {
        assert_eq!(signing_algorithm(None).unwrap(), Algorithm::RS256);
        assert_eq!(signing_algorithm(Some("ES256")).unwrap(), Algorithm::ES256);
        assert!(signing_algorithm(Some("none")).is_err());
    }
}
