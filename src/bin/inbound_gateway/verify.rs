use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Verify the email provider's signature: hex-encoded HMAC-SHA256 of the raw
/// request body in `X-Webhook-Signature`. An unset secret skips verification
/// (dev behavior, logged at startup).
pub(super) fn verify_email_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
) -> Result<(), &'static str> {
    let Some(secret) = secret.filter(|value| !value.trim().is_empty()) else {
        return Ok(());
    };
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or("missing_signature")?;

    let expected = hmac_sha256_hex(secret, body).map_err(|_| "bad_secret")?;
    if !expected.eq_ignore_ascii_case(signature.trim()) {
        return Err("invalid_signature");
    }
    Ok(())
}

/// Verify the chat provider's signature: `X-Hub-Signature-256` carries
/// `sha256=<hex HMAC-SHA256 of the raw body>`.
pub(super) fn verify_chat_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
) -> Result<(), &'static str> {
    let Some(secret) = secret.filter(|value| !value.trim().is_empty()) else {
        return Ok(());
    };
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|value| value.to_str().ok())
        .ok_or("missing_signature")?;
    let provided = signature
        .strip_prefix("sha256=")
        .ok_or("invalid_signature_format")?;

    let expected = hmac_sha256_hex(secret, body).map_err(|_| "bad_secret")?;
    if !expected.eq_ignore_ascii_case(provided.trim()) {
        return Err("invalid_signature");
    }
    Ok(())
}

/// Answer the chat webhook subscription handshake: echo the challenge when
/// the mode is `subscribe` and the verify token matches.
pub(super) fn verify_chat_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: Option<&str>,
) -> Result<String, &'static str> {
    let Some(expected) = expected_token.filter(|value| !value.trim().is_empty()) else {
        return Err("verify_token_not_configured");
    };

    if mode != Some("subscribe") {
        return Err("invalid_mode");
    }

    let provided_token = token.ok_or("missing_token")?;
    if provided_token != expected {
        return Err("token_mismatch");
    }

    challenge.map(|c| c.to_string()).ok_or("missing_challenge")
}

fn hmac_sha256_hex(secret: &str, body: &[u8]) -> Result<String, ()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| ())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed_headers(name: &'static str, value: String) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn email_signature_accepts_matching_hmac() {
        let body = br#"{"messageId":"msg-1"}"#;
        let signature = hmac_sha256_hex("topsecret", body).unwrap();
        let headers = signed_headers("x-webhook-signature", signature);
        assert!(verify_email_signature(&headers, body, Some("topsecret")).is_ok());
    }

    #[test]
    fn email_signature_rejects_mismatch_and_missing() {
        let body = b"payload";
        let headers = signed_headers("x-webhook-signature", "deadbeef".to_string());
        assert_eq!(
            verify_email_signature(&headers, body, Some("topsecret")),
            Err("invalid_signature")
        );
        assert_eq!(
            verify_email_signature(&HeaderMap::new(), body, Some("topsecret")),
            Err("missing_signature")
        );
    }

    #[test]
    fn empty_secret_skips_verification() {
        assert!(verify_email_signature(&HeaderMap::new(), b"x", None).is_ok());
        assert!(verify_email_signature(&HeaderMap::new(), b"x", Some("  ")).is_ok());
        assert!(verify_chat_signature(&HeaderMap::new(), b"x", None).is_ok());
    }

    #[test]
    fn chat_signature_requires_sha256_prefix() {
        let body = b"payload";
        let hex_sig = hmac_sha256_hex("appsecret", body).unwrap();

        let headers = signed_headers("x-hub-signature-256", format!("sha256={hex_sig}"));
        assert!(verify_chat_signature(&headers, body, Some("appsecret")).is_ok());

        let headers = signed_headers("x-hub-signature-256", hex_sig);
        assert_eq!(
            verify_chat_signature(&headers, body, Some("appsecret")),
            Err("invalid_signature_format")
        );
    }

    #[test]
    fn subscription_challenge_round_trip() {
        let challenge = verify_chat_subscription(
            Some("subscribe"),
            Some("verify-me"),
            Some("12345"),
            Some("verify-me"),
        )
        .unwrap();
        assert_eq!(challenge, "12345");

        assert_eq!(
            verify_chat_subscription(Some("subscribe"), Some("wrong"), Some("1"), Some("verify-me")),
            Err("token_mismatch")
        );
        assert_eq!(
            verify_chat_subscription(Some("unsubscribe"), Some("verify-me"), Some("1"), Some("verify-me")),
            Err("invalid_mode")
        );
        assert_eq!(
            verify_chat_subscription(Some("subscribe"), Some("verify-me"), Some("1"), None),
            Err("verify_token_not_configured")
        );
    }
}
