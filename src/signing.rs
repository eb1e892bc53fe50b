use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ReceiverConfig;

/// Issuer claim the broker puts in every signature.
pub const ISSUER: &str = "Upstash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// No `Upstash-Signature` header, or it was empty.
    MissingSignature,

    /// The token is not HMAC signed.
    UnsupportedAlgorithm,

    /// The HMAC does not match the key.
    InvalidSignature,

    InvalidIssuer,
    Expired,
    NotYetValid,

    /// A required claim (`exp`, `iss` or `body`) is absent.
    MissingClaim(String),

    /// The `body` claim does not match the SHA-256 of the received body.
    BodyHashMismatch,

    /// The token could not be decoded at all.
    Malformed(String),
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::MissingSignature =>
                write!(f, "missing signature"),
            VerificationError::UnsupportedAlgorithm =>
                write!(f, "unexpected signing method"),
            VerificationError::InvalidSignature =>
                write!(f, "invalid signature"),
            VerificationError::InvalidIssuer =>
                write!(f, "invalid issuer"),
            VerificationError::Expired =>
                write!(f, "token has expired"),
            VerificationError::NotYetValid =>
                write!(f, "token is not valid yet"),
            VerificationError::MissingClaim(claim) =>
                write!(f, "missing claim '{}'", claim),
            VerificationError::BodyHashMismatch =>
                write!(f, "body hash does not match"),
            VerificationError::Malformed(message) =>
                write!(f, "could not parse jwt: {}", message),
        }
    }
}

impl std::error::Error for VerificationError {}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm =>
                VerificationError::UnsupportedAlgorithm,
            ErrorKind::InvalidSignature =>
                VerificationError::InvalidSignature,
            ErrorKind::InvalidIssuer =>
                VerificationError::InvalidIssuer,
            ErrorKind::ExpiredSignature =>
                VerificationError::Expired,
            ErrorKind::ImmatureSignature =>
                VerificationError::NotYetValid,
            ErrorKind::MissingRequiredClaim(claim) =>
                VerificationError::MissingClaim(claim.clone()),
            _ => VerificationError::Malformed(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

/// URL-safe base64 of the SHA-256 digest of `body`, as carried in the
/// token's `body` claim.
pub fn body_hash(body: &[u8]) -> String {
    URL_SAFE.encode(Sha256::digest(body))
}

fn body_hash_matches(claim: &str, body: &[u8]) -> bool {
    claim.trim_end_matches('=') == body_hash(body).trim_end_matches('=')
}

/// Verifies broker signatures against an ordered list of signing keys.
///
/// Keys are tried in order and the first success wins. On failure the error
/// from the key that produced a valid HMAC is reported, falling back to the
/// last key's error. With the current and next key this allows the broker to rotate
/// keys without rejecting deliveries.
#[derive(Clone)]
pub struct Verifier {
    keys: Vec<DecodingKey>,
    validation: Validation,
}

impl Verifier {
    pub fn new(config: &ReceiverConfig) -> Self {
        Self::with_keys(
            [config.signing_key.as_str(), config.next_signing_key.as_str()],
            config.clock_tolerance,
        )
    }

    pub fn with_keys<'a, I>(keys: I, clock_tolerance: Duration) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = clock_tolerance.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        Self {
            keys: keys
                .into_iter()
                .map(|key| DecodingKey::from_secret(key.as_bytes()))
                .collect(),
            validation,
        }
    }

    /// Verify `token` against every key in turn.
    pub fn verify(&self, body: &[u8], token: &str) -> Result<(), VerificationError> {
        if token.is_empty() {
            return Err(VerificationError::MissingSignature);
        }

        // A failure past the HMAC check identifies the signing key, so a
        // later key's signature mismatch must not replace it.
        let mut error = None;
        for key in &self.keys {
            match self.verify_with_key(key, body, token) {
                Ok(()) => return Ok(()),
                Err(VerificationError::InvalidSignature) if error.is_some() => {}
                Err(err) => error = Some(err),
            }
        }
        Err(error.unwrap_or(VerificationError::MissingSignature))
    }

    fn verify_with_key(
        &self,
        key: &DecodingKey,
        body: &[u8],
        token: &str,
    ) -> Result<(), VerificationError> {
        let data = decode::<Claims>(token, key, &self.validation)?;
        let claim = data
            .claims
            .body
            .ok_or_else(|| VerificationError::MissingClaim("body".to_string()))?;

        if !body_hash_matches(&claim, body) {
            return Err(VerificationError::BodyHashMismatch);
        }
        Ok(())
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("keys", &self.keys.len())
            .field("leeway_secs", &self.validation.leeway)
            .finish()
    }
}

/// Produce a broker-style signature for `body`.
///
/// Useful for exercising receivers locally. The token is HS256 signed,
/// issued by [`ISSUER`], valid from now for `ttl`.
pub fn sign(
    key: &str,
    subject: &str,
    body: &[u8],
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = now_secs();
    let claims = Claims {
        iss: Some(ISSUER.to_string()),
        sub: Some(subject.to_string()),
        iat: Some(now),
        nbf: Some(now),
        exp: Some(now + ttl.as_secs()),
        body: Some(body_hash(body)),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
