//! Key handling, NIP-19 identity encoding and event signing.

use bech32::{Bech32, Hrp};
use secp256k1::{
    schnorr::Signature, All, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, SECP256K1,
};
use thiserror::Error;

use crate::event::{Event, UnsignedEvent};

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";
const NOTE_HRP: &str = "note";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("bech32: {0}")]
    Bech32(String),

    #[error("expected {expected} prefix, got {got}")]
    InvalidHrp { expected: &'static str, got: String },

    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("secp256k1: {0}")]
    Secp(#[from] secp256k1::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("id mismatch")]
    IdMismatch,
}

/// Produces signed events for one identity.
pub trait Signer: Send + Sync {
    /// Hex x-only public key of the signing identity.
    fn public_key(&self) -> &str;

    /// Compute the id of `draft` and sign it.
    fn sign(&self, draft: UnsignedEvent) -> Result<Event, KeyError>;
}

/// Secret key paired with its derived public key.
pub struct Keys {
    keypair: Keypair,
    public_key: String,
}

impl Keys {
    /// Parse a secret key given as `nsec1…` or 64 hex characters.
    pub fn parse(secret: &str) -> Result<Self, KeyError> {
        let secret = secret.trim();
        let bytes = if secret.starts_with(NSEC_HRP) {
            decode_bech32(NSEC_HRP, secret)?
        } else {
            decode_hex32(secret)?
        };
        Self::from_secret_bytes(&bytes)
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secp: &Secp256k1<All> = SECP256K1;
        let sk = SecretKey::from_slice(bytes)?;
        let keypair = Keypair::from_secret_key(secp, &sk);
        let public_key = hex::encode(keypair.x_only_public_key().0.serialize());
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// `npub1…` form of the public key.
    pub fn npub(&self) -> Result<String, KeyError> {
        encode_npub(&self.public_key)
    }
}

impl Signer for Keys {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    fn sign(&self, draft: UnsignedEvent) -> Result<Event, KeyError> {
        let hash = draft.hash()?;
        let msg = Message::from_digest(hash);
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(Event {
            id: hex::encode(hash),
            pubkey: draft.pubkey,
            kind: draft.kind,
            created_at: draft.created_at,
            tags: draft.tags,
            content: draft.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}

/// Verify an event's id and Schnorr signature.
pub fn verify(ev: &Event) -> Result<(), KeyError> {
    let draft = UnsignedEvent {
        pubkey: ev.pubkey.clone(),
        kind: ev.kind,
        created_at: ev.created_at,
        tags: ev.tags.clone(),
        content: ev.content.clone(),
    };
    let hash = draft.hash()?;
    if hex::encode(hash) != ev.id {
        return Err(KeyError::IdMismatch);
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    SECP256K1.verify_schnorr(&sig, &Message::from_digest(hash), &pk)?;
    Ok(())
}

/// Encode a hex public key as `npub1…`.
pub fn encode_npub(pubkey_hex: &str) -> Result<String, KeyError> {
    encode_bech32(NPUB_HRP, &decode_hex32(pubkey_hex)?)
}

/// Decode a `note1…` identifier into a hex event id.
pub fn decode_note(note: &str) -> Result<String, KeyError> {
    Ok(hex::encode(decode_bech32(NOTE_HRP, note)?))
}

/// Resolve a user supplied event id. Ids that are not valid `note1…`
/// strings are assumed to already be raw hex and returned untouched.
pub fn resolve_event_id(id: &str) -> String {
    decode_note(id).unwrap_or_else(|_| id.to_string())
}

fn decode_hex32(s: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength(bytes.len()))
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String, KeyError> {
    let hrp = Hrp::parse(hrp).map_err(|e| KeyError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| KeyError::Bech32(e.to_string()))
}

fn decode_bech32(expected: &'static str, encoded: &str) -> Result<[u8; 32], KeyError> {
    let (hrp, data) = bech32::decode(encoded).map_err(|e| KeyError::Bech32(e.to_string()))?;
    if hrp.to_string().to_lowercase() != expected {
        return Err(KeyError::InvalidHrp {
            expected,
            got: hrp.to_string(),
        });
    }
    data.as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength(data.len()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::{Kind, Tag};

    pub(crate) fn test_keys() -> Keys {
        Keys::from_secret_bytes(&[1u8; 32]).unwrap()
    }

    #[test]
    fn parse_accepts_hex_and_nsec() {
        let hex_keys = Keys::parse(&"01".repeat(32)).unwrap();
        let nsec = encode_bech32(NSEC_HRP, &[1u8; 32]).unwrap();
        assert!(nsec.starts_with("nsec1"));
        let nsec_keys = Keys::parse(&nsec).unwrap();
        assert_eq!(hex_keys.public_key(), nsec_keys.public_key());
        assert_eq!(hex_keys.public_key().len(), 64);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Keys::parse("nsec1notreallyakey").is_err());
        assert!(Keys::parse("zz").is_err());
        assert!(Keys::parse(&"00".repeat(32)).is_err());
    }

    #[test]
    fn npub_prefix_is_checked() {
        let keys = test_keys();
        let npub = keys.npub().unwrap();
        assert!(npub.starts_with("npub1"));
        assert!(matches!(
            decode_note(&npub),
            Err(KeyError::InvalidHrp { expected: "note", .. })
        ));
    }

    #[test]
    fn note_ids_resolve_and_raw_ids_fall_back() {
        let raw = "ab".repeat(32);
        let note = encode_bech32(NOTE_HRP, &decode_hex32(&raw).unwrap()).unwrap();
        assert_eq!(resolve_event_id(&note), raw);
        assert_eq!(resolve_event_id(&raw), raw);
        assert_eq!(resolve_event_id("not-an-id"), "not-an-id");
    }

    #[test]
    fn signed_events_verify() {
        let keys = test_keys();
        let mut draft = UnsignedEvent::new(keys.public_key(), Kind::Note, "hello");
        draft.tags.append_unique(Tag::new(["t", "test"]));
        let ev = keys.sign(draft).unwrap();
        assert_eq!(ev.kind, 1);
        verify(&ev).unwrap();

        let mut tampered = ev.clone();
        tampered.content = "bye".into();
        assert!(matches!(verify(&tampered), Err(KeyError::IdMismatch)));
    }
}
