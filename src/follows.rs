//! Cached profiles of followed authors, refreshed at most every three hours.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::RelayError,
    event::{Kind, Profile},
    filter::Filter,
    transport::Session,
};

/// How long a non-empty cache is trusted.
pub const FOLLOW_TTL_SECS: i64 = 3 * 60 * 60;

/// Followed author public keys mapped to their profiles, persisted in the
/// profile's config file next to the relays.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FollowCache {
    #[serde(default)]
    pub follows: BTreeMap<String, Profile>,
    #[serde(default)]
    pub updated: DateTime<Utc>,
}

/// What `refresh_if_stale` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    Fresh,
    /// Carries every key named by a contact list, including keys whose
    /// metadata was missing or malformed.
    Rebuilt(BTreeSet<String>),
}

impl FollowCache {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.follows.is_empty() || self.updated + Duration::seconds(FOLLOW_TTL_SECS) < now
    }

    /// Followed author keys.
    pub fn authors(&self) -> Vec<String> {
        self.follows.keys().cloned().collect()
    }

    pub fn profile(&self, pubkey: &str) -> Option<&Profile> {
        self.follows.get(pubkey)
    }

    /// Rebuild the cache from `session` when it is stale.
    ///
    /// A rebuild reads contact lists, then metadata for every author found,
    /// and replaces the whole mapping. Metadata that does not parse is left
    /// out. A fresh cache causes no network activity. The caller persists
    /// the result on `Refresh::Rebuilt`.
    pub async fn refresh_if_stale(
        &mut self,
        session: &dyn Session,
        now: DateTime<Utc>,
    ) -> Result<Refresh, RelayError> {
        if !self.is_stale(now) {
            return Ok(Refresh::Fresh);
        }

        let contacts = session
            .query_sync(&Filter::new().kind(Kind::ContactList))
            .await?;
        let authors: BTreeSet<String> = contacts.into_iter().map(|ev| ev.pubkey).collect();
        debug!(relay = session.url(), count = authors.len(), "found follows");

        let mut newest: HashMap<String, (u64, Profile)> = HashMap::new();
        if !authors.is_empty() {
            let metadata = session
                .query_sync(&Filter::new().kind(Kind::Metadata).authors(authors.iter().cloned()))
                .await?;
            for ev in metadata {
                let Some(profile) = Profile::from_metadata(&ev) else {
                    debug!(pubkey = %ev.pubkey, "skipping malformed metadata");
                    continue;
                };
                let newer = newest
                    .get(&ev.pubkey)
                    .map_or(true, |(seen, _)| ev.created_at > *seen);
                if newer {
                    newest.insert(ev.pubkey, (ev.created_at, profile));
                }
            }
        }

        self.follows = newest
            .into_iter()
            .map(|(pubkey, (_, profile))| (pubkey, profile))
            .collect();
        self.updated = now;
        Ok(Refresh::Rebuilt(authors))
    }
}
