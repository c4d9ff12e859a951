//! Nostr event model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag and the rest carry data, e.g.
/// `["e", <event id>, <relay url>, "reply"]` or `["content-warning", "spoiler"]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(fields.into_iter().map(Into::into).collect())
    }
}

/// Ordered tag list with append-unique semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Tags(pub Vec<Tag>);

impl Tags {
    /// Append `tag` unless an equal tag is already present.
    pub fn append_unique(&mut self, tag: Tag) {
        if !self.0.contains(&tag) {
            self.0.push(tag);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }
}

/// Event kinds this client produces or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Metadata,
    Note,
    ContactList,
    Deletion,
    Boost,
    Reaction,
}

impl Kind {
    pub const fn as_u32(self) -> u32 {
        match self {
            Kind::Metadata => 0,
            Kind::Note => 1,
            Kind::ContactList => 3,
            Kind::Deletion => 5,
            Kind::Boost => 6,
            Kind::Reaction => 7,
        }
    }
}

/// Signed Nostr event as exchanged with relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "79be66...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "bb22", "wss://relay", "reply"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex, x-only).
    pub pubkey: String,
    /// Kind number, e.g. `1` for a note.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    pub tags: Tags,
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

/// Event draft built by a command handler before it is signed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub kind: u32,
    pub created_at: u64,
    pub tags: Tags,
    pub content: String,
}

impl UnsignedEvent {
    /// Start a draft of `kind` authored by `pubkey`, stamped with the current time.
    pub fn new(pubkey: impl Into<String>, kind: Kind, content: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            kind: kind.as_u32(),
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
            tags: Tags::default(),
            content: content.into(),
        }
    }

    /// NIP-01 event hash over `[0, pubkey, created_at, kind, tags, content]`.
    pub fn hash(&self) -> Result<[u8; 32], serde_json::Error> {
        let arr = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let data = serde_json::to_vec(&arr)?;
        Ok(Sha256::digest(&data).into())
    }
}

/// Author metadata carried in the content of a kind-0 event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub nip05: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub lud16: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub about: String,
    #[serde(default)]
    pub name: String,
}

impl Profile {
    /// Parse a metadata event's content. Malformed content yields `None`.
    pub fn from_metadata(ev: &Event) -> Option<Self> {
        serde_json::from_str(&ev.content).ok()
    }
}
