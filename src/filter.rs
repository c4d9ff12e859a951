//! NIP-01 subscription filters.

use serde::{Deserialize, Serialize};

use crate::event::Kind;

/// Filter sent in `REQ` messages. Unset fields are omitted on the wire so
/// relays treat them as unconstrained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    /// NIP-50 full text search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.push(kind.as_u32());
        self
    }

    pub fn ids<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn authors<I: IntoIterator<Item = String>>(mut self, authors: I) -> Self {
        self.authors.extend(authors);
        self
    }

    pub fn search(mut self, words: impl Into<String>) -> Self {
        self.search = Some(words.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
