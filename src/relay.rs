//! Registry of configured relays and their capabilities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a relay is used for. Stored per endpoint in the config file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub search: bool,
}

/// A single configured relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDescriptor {
    pub url: String,
    pub capabilities: Capabilities,
}

/// Capability a given operation needs from a relay. Exactly one dimension
/// is asked for at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityRequest {
    Read,
    Write,
    Search,
}

impl CapabilityRequest {
    pub fn accepts(self, caps: &Capabilities) -> bool {
        match self {
            CapabilityRequest::Read => caps.read,
            CapabilityRequest::Write => caps.write,
            CapabilityRequest::Search => caps.search,
        }
    }
}

/// Endpoint to capability map. Keyed by URL so duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayRegistry {
    relays: BTreeMap<String, Capabilities>,
}

impl RelayRegistry {
    pub fn new(relays: impl IntoIterator<Item = (String, Capabilities)>) -> Self {
        Self {
            relays: relays.into_iter().collect(),
        }
    }

    /// Registry where every URL is readable and writable, as used by the
    /// `--relays` override.
    pub fn read_write<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let caps = Capabilities {
            read: true,
            write: true,
            search: false,
        };
        Self::new(urls.into_iter().map(|u| (u.into(), caps)))
    }

    /// Descriptors accepted by `request`. No ordering is promised.
    pub fn matching(&self, request: CapabilityRequest) -> Vec<RelayDescriptor> {
        self.relays
            .iter()
            .filter(|(_, caps)| request.accepts(caps))
            .map(|(url, caps)| RelayDescriptor {
                url: url.clone(),
                capabilities: *caps,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(read: bool, write: bool, search: bool) -> Capabilities {
        Capabilities {
            read,
            write,
            search,
        }
    }

    fn urls(list: Vec<RelayDescriptor>) -> Vec<String> {
        let mut urls: Vec<String> = list.into_iter().map(|d| d.url).collect();
        urls.sort();
        urls
    }

    #[test]
    fn matching_follows_capabilities() {
        let reg = RelayRegistry::new([
            ("wss://a".to_string(), caps(false, true, false)),
            ("wss://b".to_string(), caps(true, true, false)),
            ("wss://c".to_string(), caps(false, false, true)),
        ]);
        assert_eq!(
            urls(reg.matching(CapabilityRequest::Write)),
            vec!["wss://a", "wss://b"]
        );
        assert_eq!(urls(reg.matching(CapabilityRequest::Search)), vec!["wss://c"]);
        assert_eq!(urls(reg.matching(CapabilityRequest::Read)), vec!["wss://b"]);
    }

    #[test]
    fn duplicate_endpoints_collapse() {
        let reg = RelayRegistry::read_write(["wss://a", "wss://a", "wss://b"]);
        assert_eq!(reg.len(), 2);
        assert!(reg.matching(CapabilityRequest::Search).is_empty());
    }

    #[test]
    fn capabilities_default_to_false_in_json() {
        let c: Capabilities = serde_json::from_str(r#"{"read":true}"#).unwrap();
        assert_eq!(c, caps(true, false, false));
    }
}
