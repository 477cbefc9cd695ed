//! Transparent encode/decode boundary for ticket storage.
//!
//! Security boundaries:
//! - The registry is the only component that encodes or decodes tickets;
//!   everything else sees decoded entities.
//! - The stored key is a one-way digest of the real ticket id, so a dump of
//!   the backing store never reveals usable ticket ids.
//! - The payload is AEAD-encrypted with the digest id and ticket prefix
//!   bound as associated data.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::ticket::{Ticket, TicketError};

const NONCE_BYTES: usize = 12;

/// An encrypted, serialized ticket as held by the backing store.
///
/// Carries only the digest id, the type-tag prefix and the opaque payload;
/// no ticket operation is possible on this representation until the registry
/// decodes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedTicket {
    id: String,
    prefix: String,
    payload: Vec<u8>,
}

impl EncodedTicket {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// AEAD cipher wrapping every registry read/write when enabled.
pub struct TicketCipher {
    key: SecretBox<[u8; 32]>,
}

impl TicketCipher {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: SecretBox::new(Box::new(key)),
        }
    }

    /// Deterministic one-way digest of a ticket id; the externally-visible
    /// storage key. Lookups by plaintext id digest first.
    #[must_use]
    pub fn digest_id(&self, id: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(id.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Serialize and encrypt a ticket. Layout: `nonce (12 bytes) || ciphertext`.
    ///
    /// # Errors
    /// Returns [`TicketError::Encoding`] if serialization or encryption
    /// fails.
    pub fn encode(&self, ticket: &Ticket) -> Result<EncodedTicket, TicketError> {
        let plaintext = serde_json::to_vec(ticket)
            .map_err(|err| TicketError::Encoding(err.to_string()))?;

        let digest_id = self.digest_id(ticket.id());
        let prefix = ticket.prefix().to_string();

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.expose_secret()));
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|err| TicketError::Encoding(err.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = construct_aad(&prefix, &digest_id);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|err| TicketError::Encoding(err.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(EncodedTicket {
            id: digest_id,
            prefix,
            payload,
        })
    }

    /// Decrypt and deserialize a stored ticket.
    ///
    /// # Errors
    /// Returns [`TicketError::Decoding`] if the payload is malformed, was
    /// tampered with, or does not match its associated data.
    pub fn decode(&self, encoded: &EncodedTicket) -> Result<Ticket, TicketError> {
        if encoded.payload.len() < NONCE_BYTES {
            return Err(TicketError::Decoding(
                "payload shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = encoded.payload.split_at(NONCE_BYTES);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.expose_secret()));
        let aad = construct_aad(&encoded.prefix, &encoded.id);
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|err| TicketError::Decoding(err.to_string()))?;

        serde_json::from_slice(&plaintext).map_err(|err| TicketError::Decoding(err.to_string()))
    }
}

fn construct_aad(prefix: &str, digest_id: &str) -> Vec<u8> {
    format!("ticket:v1|{prefix}|{digest_id}").into_bytes()
}
