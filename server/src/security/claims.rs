use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use super::{expected_issuer, VerifiedIdentity};

/// Url-safe alphabet, padding optional. Standard-alphabet input is mapped
/// onto it before decoding.
const TOLERANT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The payload fields the gate looks at. String and boolean claims of the
/// wrong JSON type decode as `None` and are rejected by [`validate`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(default, deserialize_with = "lenient")]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub iss: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub aud: Option<String>,
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub iat: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub email_verified: Option<bool>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("token does not have three segments")]
    Format,

    #[error("token payload is unreadable: {0}")]
    Payload(String),
}

/// Why a well-formed token was refused. `Display` is the caller-facing text.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("Token expired")]
    Expired,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Invalid audience")]
    InvalidAudience,

    #[error("Token used before issued")]
    UsedBeforeIssued,

    #[error("Invalid subject")]
    InvalidSubject,
}

pub(crate) fn decode_segment(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    TOLERANT.decode(normalized)
}

/// Read the claims out of `header.payload.signature` without looking at the
/// signature.
pub fn decode(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Format);
    }

    let bytes = decode_segment(segments[1]).map_err(|err| TokenError::Payload(err.to_string()))?;
    let payload: Value = serde_json::from_slice(&bytes).map_err(|err| TokenError::Payload(err.to_string()))?;
    if !payload.is_object() {
        return Err(TokenError::Payload("payload is not a JSON object".to_string()));
    }
    serde_json::from_value(payload).map_err(|err| TokenError::Payload(err.to_string()))
}

/// Check the claims against `now` (unix seconds) and the configured project.
/// Checks run in a fixed order and the first failure is returned.
pub fn validate(claims: &Claims, now: i64, project_id: &str) -> Result<VerifiedIdentity, Rejection> {
    let now = now as f64;

    if matches!(claims.exp, Some(exp) if exp < now) {
        return Err(Rejection::Expired);
    }
    if claims.iss.as_deref() != Some(expected_issuer(project_id).as_str()) {
        return Err(Rejection::InvalidIssuer);
    }
    if claims.aud.as_deref() != Some(project_id) {
        return Err(Rejection::InvalidAudience);
    }
    if matches!(claims.iat, Some(iat) if iat > now) {
        return Err(Rejection::UsedBeforeIssued);
    }
    let external_id = match claims.sub.as_deref() {
        Some(sub) if !sub.is_empty() => sub.to_string(),
        _ => return Err(Rejection::InvalidSubject),
    };

    Ok(VerifiedIdentity {
        external_id,
        email: claims.email.clone(),
        email_verified: claims.email_verified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::testing::{claims_for, unsigned_token};
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOW: i64 = 1_790_000_000;

    fn claims(payload: Value) -> Claims {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn decodes_a_well_formed_token() {
        let token = unsigned_token(&claims_for("abc123", "proj1", NOW));
        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.sub.as_deref(), Some("abc123"));
        assert_eq!(decoded.aud.as_deref(), Some("proj1"));
        assert_eq!(decoded.exp, Some((NOW + 3600) as f64));
        assert_eq!(decoded.email_verified, Some(true));
    }

    #[test]
    fn segment_count_is_checked_before_payload() {
        assert_eq!(decode("only.two"), Err(TokenError::Format));
        assert_eq!(decode("a.b.c.d"), Err(TokenError::Format));
        assert_eq!(decode("!!!.@@@"), Err(TokenError::Format));
    }

    #[test]
    fn payload_accepts_either_alphabet_and_padding() {
        // '?' and '>' encode to '/' and '+' in the standard alphabet
        let payload = json!({ "sub": "a??>>", "note": "~~~" }).to_string();
        let standard = STANDARD.encode(&payload);
        assert!(standard.contains('/') || standard.contains('+'));

        let decoded = decode(&format!("h.{}.s", standard)).unwrap();
        assert_eq!(decoded.sub.as_deref(), Some("a??>>"));

        let unpadded = URL_SAFE_NO_PAD.encode(&payload);
        assert_eq!(decode(&format!("h.{}.s", unpadded)).unwrap().sub.as_deref(), Some("a??>>"));
    }

    #[test]
    fn unreadable_payloads_are_decode_errors() {
        assert!(matches!(decode("h.***.s"), Err(TokenError::Payload(_))));

        let not_json = URL_SAFE_NO_PAD.encode("not json");
        assert!(matches!(decode(&format!("h.{}.s", not_json)), Err(TokenError::Payload(_))));

        let array = URL_SAFE_NO_PAD.encode("[1,2]");
        assert!(matches!(decode(&format!("h.{}.s", array)), Err(TokenError::Payload(_))));
    }

    #[test]
    fn mistyped_claims_decode_then_fail_validation() {
        let token = unsigned_token(&json!({
            "sub": 42,
            "iss": "https://securetoken.google.com/proj1",
            "aud": "proj1",
            "email_verified": "yes",
        }));
        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.sub, None);
        assert_eq!(decoded.email_verified, None);
        assert_eq!(validate(&decoded, NOW, "proj1"), Err(Rejection::InvalidSubject));
    }

    #[test]
    fn accepts_valid_claims() {
        let identity = validate(&claims(claims_for("abc123", "proj1", NOW)), NOW, "proj1").unwrap();
        assert_eq!(
            identity,
            VerifiedIdentity {
                external_id: "abc123".into(),
                email: Some("dealer@example.com".into()),
                email_verified: Some(true),
            }
        );
    }

    #[test]
    fn each_single_violation_names_its_claim() {
        let cases = vec![
            ("exp", json!(NOW - 10), Rejection::Expired),
            ("iss", json!("https://securetoken.google.com/other"), Rejection::InvalidIssuer),
            ("aud", json!("other-project"), Rejection::InvalidAudience),
            ("iat", json!(NOW + 60), Rejection::UsedBeforeIssued),
            ("sub", json!(""), Rejection::InvalidSubject),
        ];
        for (field, value, expected) in cases {
            let mut payload = claims_for("abc123", "proj1", NOW);
            payload[field] = value;
            assert_eq!(validate(&claims(payload), NOW, "proj1"), Err(expected), "{}", field);
        }
    }

    #[test]
    fn expiry_and_issue_time_are_inclusive_of_now() {
        let mut payload = claims_for("abc123", "proj1", NOW);
        payload["exp"] = json!(NOW);
        payload["iat"] = json!(NOW);
        assert!(validate(&claims(payload), NOW, "proj1").is_ok());
    }

    #[test]
    fn optional_time_claims_may_be_absent_or_fractional() {
        let mut payload = claims_for("abc123", "proj1", NOW);
        payload.as_object_mut().unwrap().remove("exp");
        payload.as_object_mut().unwrap().remove("iat");
        assert!(validate(&claims(payload), NOW, "proj1").is_ok());

        let mut payload = claims_for("abc123", "proj1", NOW);
        payload["exp"] = json!(NOW as f64 - 0.5);
        assert_eq!(validate(&claims(payload), NOW, "proj1"), Err(Rejection::Expired));
    }

    #[test]
    fn first_failing_check_wins() {
        let payload = json!({
            "sub": "",
            "iss": "https://evil.example.com",
            "aud": "other",
            "exp": NOW - 1,
        });
        assert_eq!(validate(&claims(payload), NOW, "proj1"), Err(Rejection::Expired));
    }

    #[test]
    fn rejection_text_is_caller_facing() {
        assert_eq!(Rejection::Expired.to_string(), "Token expired");
        assert_eq!(Rejection::UsedBeforeIssued.to_string(), "Token used before issued");
    }
}
