//! Shared HTTP client construction and endpoint validation.

use std::time::Duration;

/// Build the outbound HTTP client used for discovery, token exchange,
/// UserInfo, and metadata fetches. Redirects are disabled so provider
/// endpoints cannot bounce us elsewhere; every call carries a 10 s
/// deadline.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Validate an outbound provider endpoint. HTTPS only, unless the
/// deployment opted into insecure transport for non-production
/// issuers.
pub(crate) fn validate_endpoint_url(url_str: &str, allow_insecure: bool) -> Result<(), String> {
    let url = url::Url::parse(url_str).map_err(|e| format!("invalid URL: {e}"))?;
    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        scheme => return Err(format!("only HTTPS endpoints are allowed, got {scheme}")),
    }
    if url.host_str().is_none() {
        return Err("URL has no host".to_string());
    }
    Ok(())
}

/// Truncate a provider-controlled response body before logging it.
/// Cuts at a char boundary to avoid panicking on multi-byte UTF-8.
pub(crate) fn truncate_for_log(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let safe_end = body
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    format!("{}... (truncated)", &body[..safe_end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_http_unless_insecure_allowed() {
        assert!(validate_endpoint_url("http://idp.example.com", false).is_err());
        assert!(validate_endpoint_url("http://idp.example.com", true).is_ok());
        assert!(validate_endpoint_url("https://idp.example.com", false).is_ok());
    }

    #[test]
    fn rejects_other_schemes_even_when_insecure_allowed() {
        assert!(validate_endpoint_url("file:///etc/passwd", true).is_err());
    }

    #[test]
    fn truncation_is_char_boundary_safe() {
        let body = "é".repeat(400);
        let truncated = truncate_for_log(&body);
        assert!(truncated.ends_with("(truncated)"));
        assert!(truncated.len() < body.len());
    }
}
