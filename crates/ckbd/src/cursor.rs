//! HMAC-signed opaque pagination cursors.
//!
//! A cursor is a capability over pagination state, not a hint: clients
//! cannot mint or alter one without the server secret, and a cursor issued
//! for one entity is rejected by every other endpoint.

use base64::URL_SAFE_NO_PAD;
use hmac::digest::MacError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorEntity {
    Symbol,
    Ref,
    File,
    Callgraph,
}

impl CursorEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorEntity::Symbol => "symbol",
            CursorEntity::Ref => "ref",
            CursorEntity::File => "file",
            CursorEntity::Callgraph => "callgraph",
        }
    }
}

/// Pagination state carried by a cursor. `schema_version` is included in the
/// signed payload so schema migrations invalidate outstanding cursors.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CursorData {
    pub entity: CursorEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pk: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i32>,
}

impl CursorData {
    pub fn keyset(entity: CursorEntity, last_pk: i64, schema_version: i32) -> Self {
        Self {
            entity,
            last_pk: Some(last_pk),
            offset: None,
            schema_version: Some(schema_version),
        }
    }

    /// Endpoints must verify a decoded cursor was issued for them.
    pub fn validate_entity(&self, expected: CursorEntity) -> Result<(), CursorError> {
        if self.entity == expected {
            Ok(())
        } else {
            Err(CursorError::EntityMismatch {
                expected,
                actual: self.entity,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("bad cursor encoding")]
    Encoding(#[from] base64::DecodeError),

    #[error("malformed cursor")]
    Malformed,

    #[error("malformed cursor payload")]
    Payload(#[from] serde_json::Error),

    #[error("invalid cursor signature")]
    Signature(#[from] MacError),

    #[error("cursor was issued for {} but this endpoint serves {}", actual.as_str(), expected.as_str())]
    EntityMismatch {
        expected: CursorEntity,
        actual: CursorEntity,
    },
}

/// Encoder/decoder over a process-wide secret, read-only after startup.
pub struct CursorCodec {
    key: Vec<u8>,
}

impl CursorCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    /// Generate a random secret. Cursors minted under it die with the
    /// process, so configured deployments should pin one instead.
    pub fn generated() -> Self {
        use rand::RngCore;

        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        tracing::warn!("no cursor secret configured; generated one, cursors will not survive restarts");
        Self { key }
    }

    /// `base64url(payload) "." base64url(hmac_sha256(secret, payload))`.
    pub fn encode(&self, data: &CursorData) -> String {
        let payload = serde_json::to_vec(data).expect("cursor payload is serializable");
        let mac = self.mac(&payload);
        format!(
            "{}.{}",
            base64::encode_config(&payload, URL_SAFE_NO_PAD),
            base64::encode_config(mac, URL_SAFE_NO_PAD),
        )
    }

    /// Decode and verify. The empty string is the first page, not an error.
    pub fn decode(&self, raw: &str) -> Result<Option<CursorData>, CursorError> {
        if raw.is_empty() {
            return Ok(None);
        }
        let (payload_b64, mac_b64) = raw.split_once('.').ok_or(CursorError::Malformed)?;
        let payload = base64::decode_config(payload_b64, URL_SAFE_NO_PAD)?;
        let mac = base64::decode_config(mac_b64, URL_SAFE_NO_PAD)?;

        // Constant-time comparison via the Mac verifier.
        let mut hmac = self.hmac();
        hmac.update(&payload);
        hmac.verify_slice(&mac)?;

        Ok(Some(serde_json::from_slice(&payload)?))
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut hmac = self.hmac();
        hmac.update(payload);
        hmac.finalize().into_bytes().to_vec()
    }

    fn hmac(&self) -> Hmac<Sha256> {
        Hmac::<Sha256>::new_from_slice(&self.key)
            .expect("HMAC can take a key of any size so this cannot fail")
    }
}
