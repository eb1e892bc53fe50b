use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use qstash::{
    body_hash, sign, Acknowledgement, ConfigError, Message, ReceiveOutcome, Receiver,
    ReceiverConfig, VerificationError, Verifier,
};
use serde_json::{json, Value};

const CURRENT: &str = "sig_current";
const NEXT: &str = "sig_next";

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn claims(body: &[u8]) -> Value {
    json!({
        "iss": "Upstash",
        "sub": "https://example.com/api/webhook",
        "iat": now(),
        "nbf": now(),
        "exp": now() + 300,
        "jti": "jwt_123",
        "body": body_hash(body),
    })
}

fn token_with(key: &str, claims: &Value, alg: Algorithm) -> String {
    encode(&Header::new(alg), claims, &EncodingKey::from_secret(key.as_bytes())).unwrap()
}

fn token(key: &str, body: &[u8]) -> String {
    token_with(key, &claims(body), Algorithm::HS256)
}

fn receiver() -> Receiver {
    Receiver::new(ReceiverConfig::new(CURRENT, NEXT)).unwrap()
}

fn verifier() -> Verifier {
    Verifier::with_keys([CURRENT, NEXT], Duration::ZERO)
}

fn headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("upstash-signature", HeaderValue::from_str(token).unwrap());
    headers.insert("upstash-message-id", HeaderValue::from_static("msg_1"));
    headers.insert("upstash-retried", HeaderValue::from_static("2"));
    headers.insert("upstash-forward-tenant", HeaderValue::from_static("acme"));
    headers
}

/// Handler that records what it saw and answers with a fixed decision.
fn recording(
    decision: Acknowledgement,
) -> (
    impl Fn(Message) -> std::future::Ready<Acknowledgement> + Send + Sync,
    Arc<Mutex<Vec<Message>>>,
) {
    let seen: Arc<Mutex<Vec<Message>>> = Arc::default();
    let sink = seen.clone();
    let handler = move |message: Message| {
        sink.lock().unwrap().push(message);
        std::future::ready(decision)
    };
    (handler, seen)
}

#[test]
fn token_signed_with_current_key_verifies() {
    assert_eq!(verifier().verify(b"hello", &token(CURRENT, b"hello")), Ok(()));
}

#[test]
fn mismatched_body_fails_hash_check() {
    let result = verifier().verify(b"goodbye", &token(CURRENT, b"hello"));
    assert_eq!(result, Err(VerificationError::BodyHashMismatch));
}

#[test]
fn next_key_is_used_during_rotation() {
    let token = token(NEXT, b"hello");

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(
        current_only.verify(b"hello", &token),
        Err(VerificationError::InvalidSignature)
    );
    assert_eq!(verifier().verify(b"hello", &token), Ok(()));
}

#[test]
fn unknown_key_is_rejected() {
    let result = verifier().verify(b"hello", &token("someone-else", b"hello"));
    assert_eq!(result, Err(VerificationError::InvalidSignature));
}

#[test]
fn last_key_failure_is_reported() {
    let mut expired = claims(b"hello");
    expired["exp"] = json!(now() - 60);
    let token = token_with(NEXT, &expired, Algorithm::HS256);

    // The current key fails on the signature, the next key on expiry.
    assert_eq!(verifier().verify(b"hello", &token), Err(VerificationError::Expired));
}

#[test]
fn current_key_expiry_is_not_masked_by_next_key() {
    let mut expired = claims(b"hello");
    expired["exp"] = json!(now() - 60);
    let token = token_with(CURRENT, &expired, Algorithm::HS256);

    assert_eq!(verifier().verify(b"hello", &token), Err(VerificationError::Expired));
}

#[test]
fn wrong_issuer_is_rejected() {
    let mut claims = claims(b"hello");
    claims["iss"] = json!("Someone");
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(current_only.verify(b"hello", &token), Err(VerificationError::InvalidIssuer));
}

#[test]
fn missing_issuer_is_rejected() {
    let mut claims = claims(b"hello");
    claims.as_object_mut().unwrap().remove("iss");
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(
        current_only.verify(b"hello", &token),
        Err(VerificationError::MissingClaim("iss".to_string()))
    );
}

#[test]
fn expired_token_is_rejected() {
    let mut claims = claims(b"hello");
    claims["exp"] = json!(now() - 10);
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(current_only.verify(b"hello", &token), Err(VerificationError::Expired));
}

#[test]
fn clock_tolerance_accepts_slightly_expired_token() {
    let mut claims = claims(b"hello");
    claims["exp"] = json!(now() - 10);
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let tolerant = Verifier::with_keys([CURRENT], Duration::from_secs(60));
    assert_eq!(tolerant.verify(b"hello", &token), Ok(()));
}

#[test]
fn token_without_expiry_is_rejected() {
    let mut claims = claims(b"hello");
    claims.as_object_mut().unwrap().remove("exp");
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(
        current_only.verify(b"hello", &token),
        Err(VerificationError::MissingClaim("exp".to_string()))
    );
}

#[test]
fn future_not_before_is_rejected() {
    let mut claims = claims(b"hello");
    claims["nbf"] = json!(now() + 120);
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(current_only.verify(b"hello", &token), Err(VerificationError::NotYetValid));
}

#[test]
fn absent_not_before_is_accepted() {
    let mut claims = claims(b"hello");
    claims.as_object_mut().unwrap().remove("nbf");
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    assert_eq!(verifier().verify(b"hello", &token), Ok(()));
}

#[test]
fn missing_body_claim_is_rejected() {
    let mut claims = claims(b"hello");
    claims.as_object_mut().unwrap().remove("body");
    let token = token_with(CURRENT, &claims, Algorithm::HS256);

    let current_only = Verifier::with_keys([CURRENT], Duration::ZERO);
    assert_eq!(
        current_only.verify(b"hello", &token),
        Err(VerificationError::MissingClaim("body".to_string()))
    );
}

#[test]
fn other_hmac_variants_are_accepted() {
    let token = token_with(CURRENT, &claims(b"hello"), Algorithm::HS512);
    assert_eq!(verifier().verify(b"hello", &token), Ok(()));
}

#[test]
fn non_hmac_algorithm_is_rejected() {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims(b"hello").to_string());
    let token = format!("{}.{}.{}", header, payload, URL_SAFE_NO_PAD.encode(b"sig"));

    assert_eq!(
        verifier().verify(b"hello", &token),
        Err(VerificationError::UnsupportedAlgorithm)
    );
}

#[test]
fn sign_helper_round_trips() {
    let token = sign(CURRENT, "https://example.com", b"payload", Duration::from_secs(60)).unwrap();
    assert_eq!(verifier().verify(b"payload", &token), Ok(()));
    assert_eq!(
        verifier().verify(b"tampered", &token),
        Err(VerificationError::BodyHashMismatch)
    );
}

#[tokio::test]
async fn acknowledged_message_gets_200() {
    let (handler, seen) = recording(Acknowledgement::Ack);

    let outcome = receiver()
        .receive(&headers(&token(CURRENT, b"hello")), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Acknowledged);
    assert_eq!(outcome.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(&seen[0].body[..], b"hello");
    assert_eq!(seen[0].id, "msg_1");
    assert_eq!(seen[0].retried, 2);
    assert_eq!(seen[0].headers["upstash-forward-tenant"], "acme");
}

#[tokio::test]
async fn unacknowledged_message_gets_422() {
    let (handler, seen) = recording(Acknowledgement::Nack);

    let outcome = receiver()
        .receive(&headers(&token(CURRENT, b"hello")), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Unacknowledged);
    assert_eq!(outcome.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_signature_gets_401_without_calling_handler() {
    let (handler, seen) = recording(Acknowledgement::Ack);

    let outcome = receiver()
        .receive(&headers(&token("forged", b"hello")), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Rejected(VerificationError::InvalidSignature));
    assert_eq!(outcome.status(), StatusCode::UNAUTHORIZED);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_signature_gets_401() {
    let (handler, seen) = recording(Acknowledgement::Ack);

    let outcome = receiver()
        .receive(&HeaderMap::new(), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Rejected(VerificationError::MissingSignature));
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn body_substitution_is_rejected() {
    let (handler, seen) = recording(Acknowledgement::Ack);

    let outcome = receiver()
        .receive(&headers(&token(CURRENT, b"hello")), Bytes::from_static(b"evil"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Rejected(VerificationError::BodyHashMismatch));
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn message_signed_with_next_key_is_delivered() {
    let (handler, seen) = recording(Acknowledgement::Ack);

    let outcome = receiver()
        .receive(&headers(&token(NEXT, b"hello")), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Acknowledged);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unparsable_retry_count_defaults_to_zero() {
    let (handler, seen) = recording(Acknowledgement::Ack);
    let mut headers = headers(&token(CURRENT, b"hello"));
    headers.insert("upstash-retried", HeaderValue::from_static("many"));

    receiver()
        .receive(&headers, Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(seen.lock().unwrap()[0].retried, 0);
}

#[tokio::test]
async fn panicking_handler_leaves_message_unacknowledged() {
    let handler = |_message: Message| async move {
        if true {
            panic!("handler blew up");
        }
        Acknowledgement::Ack
    };

    let outcome = receiver()
        .receive(&headers(&token(CURRENT, b"hello")), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Unacknowledged);
}

#[tokio::test]
async fn async_handler_runs_to_completion_before_responding() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = move |_message: Message| {
        let counter = counter.clone();
        async move {
            tokio::task::yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst);
            Acknowledgement::Ack
        }
    };

    let outcome = receiver()
        .receive(&headers(&token(CURRENT, b"hello")), Bytes::from_static(b"hello"), &handler)
        .await;

    assert_eq!(outcome, ReceiveOutcome::Acknowledged);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handle_request_maps_outcomes_to_responses() {
    let (ack, _) = recording(Acknowledgement::Ack);
    let (nack, _) = recording(Acknowledgement::Nack);
    let receiver = receiver();

    let build = |token: &str| {
        let mut request = Request::new(Bytes::from_static(b"hello"));
        *request.headers_mut() = headers(token);
        request
    };

    let response = receiver.handle_request(build(&token(CURRENT, b"hello")), &ack).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());

    let response = receiver.handle_request(build(&token(CURRENT, b"hello")), &nack).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.body(), "message was not acknowledged by the receiver");

    let response = receiver.handle_request(build(&token("forged", b"hello")), &ack).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.body(), "invalid signature");
}

#[test]
fn receiver_requires_both_keys() {
    assert_eq!(
        Receiver::new(ReceiverConfig::new("", NEXT)).unwrap_err(),
        ConfigError::MissingSigningKey
    );
    assert_eq!(
        Receiver::new(ReceiverConfig::new(CURRENT, "")).unwrap_err(),
        ConfigError::MissingNextSigningKey
    );
}
