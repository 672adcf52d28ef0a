//! Per-source webhook signature verification (SPEC_FULL.md §4.5, §4.5.1).
//!
//! Both schemes sit behind one trait so the route table can hold
//! `Box<dyn SignatureVerifier>` per route without the handler knowing which
//! scheme backs a given path (§9 "dynamic dispatch by source").

use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use feedback_errors::GatewayError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Requests whose `timestamp` differs from now by more than this are
/// rejected as replays, regardless of signature validity (§4.5).
pub const REPLAY_WINDOW_SECS: i64 = 300;

pub trait SignatureVerifier: Send + Sync {
    /// Verifies `body` was signed at `timestamp` (unix seconds). Returns
    /// `Ok(())` on success, `Err(GatewayError::BadSignature)` or
    /// `Err(GatewayError::StaleTimestamp)` otherwise.
    fn verify(&self, timestamp: i64, body: &[u8], signature: &str) -> Result<(), GatewayError>;
}

fn within_replay_window(timestamp: i64) -> bool {
    (Utc::now().timestamp() - timestamp).abs() <= REPLAY_WINDOW_SECS
}

/// Source A: Ed25519 over `timestamp || body` (§4.5).
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, GatewayError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| GatewayError::MalformedPayload(format!("bad verifying key hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GatewayError::MalformedPayload("verifying key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| GatewayError::MalformedPayload(format!("invalid verifying key: {e}")))?;
        Ok(Self::new(key))
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, timestamp: i64, body: &[u8], signature: &str) -> Result<(), GatewayError> {
        if !within_replay_window(timestamp) {
            return Err(GatewayError::StaleTimestamp);
        }
        let sig_bytes = hex::decode(signature).map_err(|_| GatewayError::BadSignature)?;
        let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| GatewayError::BadSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);

        let mut signed = timestamp.to_string().into_bytes();
        signed.extend_from_slice(body);

        self.key
            .verify(&signed, &signature)
            .map_err(|_| GatewayError::BadSignature)
    }
}

/// Source B: HMAC-SHA-256 over `"v0:{timestamp}:{body}"` (§4.5).
pub struct HmacVerifier {
    secret: Vec<u8>,
}

impl HmacVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }
}

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, timestamp: i64, body: &[u8], signature: &str) -> Result<(), GatewayError> {
        if !within_replay_window(timestamp) {
            return Err(GatewayError::StaleTimestamp);
        }
        let supplied = hex::decode(signature).map_err(|_| GatewayError::BadSignature)?;

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).map_err(|_| GatewayError::BadSignature)?;
        mac.update(b"v0:");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b":");
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        // P5: constant-time comparison regardless of where bytes first differ.
        if expected.ct_eq(&supplied).into() {
            Ok(())
        } else {
            Err(GatewayError::BadSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn ed25519_round_trips_a_valid_signature() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = Ed25519Verifier::new(signing_key.verifying_key());
        let timestamp = Utc::now().timestamp();
        let body = br#"{"content":"App crashes on startup"}"#;

        let mut signed = timestamp.to_string().into_bytes();
        signed.extend_from_slice(body);
        let signature = signing_key.sign(&signed);

        assert!(verifier
            .verify(timestamp, body, &hex::encode(signature.to_bytes()))
            .is_ok());
    }

    #[test]
    fn ed25519_rejects_tampered_body() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = Ed25519Verifier::new(signing_key.verifying_key());
        let timestamp = Utc::now().timestamp();
        let mut signed = timestamp.to_string().into_bytes();
        signed.extend_from_slice(b"original");
        let signature = signing_key.sign(&signed);

        let err = verifier
            .verify(timestamp, b"tampered", &hex::encode(signature.to_bytes()))
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadSignature));
    }

    #[test]
    fn ed25519_rejects_stale_timestamp() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = Ed25519Verifier::new(signing_key.verifying_key());
        let timestamp = Utc::now().timestamp() - (REPLAY_WINDOW_SECS + 1);
        let mut signed = timestamp.to_string().into_bytes();
        signed.extend_from_slice(b"body");
        let signature = signing_key.sign(&signed);

        let err = verifier
            .verify(timestamp, b"body", &hex::encode(signature.to_bytes()))
            .unwrap_err();
        assert!(matches!(err, GatewayError::StaleTimestamp));
    }

    #[test]
    fn hmac_round_trips_a_valid_signature() {
        let verifier = HmacVerifier::new(b"shared-secret".to_vec());
        let timestamp = Utc::now().timestamp();
        let body = br#"{"content":"Login button is broken"}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(b"shared-secret").unwrap();
        mac.update(b"v0:");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b":");
        mac.update(body);
        let tag = hex::encode(mac.finalize().into_bytes());

        assert!(verifier.verify(timestamp, body, &tag).is_ok());
    }

    #[test]
    fn hmac_rejects_wrong_secret() {
        let verifier = HmacVerifier::new(b"shared-secret".to_vec());
        let timestamp = Utc::now().timestamp();
        let body = b"body";

        let mut mac = Hmac::<Sha256>::new_from_slice(b"wrong-secret").unwrap();
        mac.update(b"v0:");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b":");
        mac.update(body);
        let tag = hex::encode(mac.finalize().into_bytes());

        let err = verifier.verify(timestamp, body, &tag).unwrap_err();
        assert!(matches!(err, GatewayError::BadSignature));
    }

    #[test]
    fn hmac_rejects_timestamp_one_second_past_the_window() {
        let verifier = HmacVerifier::new(b"shared-secret".to_vec());
        let timestamp = Utc::now().timestamp() - (REPLAY_WINDOW_SECS + 1);
        let err = verifier.verify(timestamp, b"body", "00").unwrap_err();
        assert!(matches!(err, GatewayError::StaleTimestamp));
    }
}
