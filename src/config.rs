//! Per-profile JSON configuration: relays, signing key and the follow cache.

use std::{
    collections::BTreeMap,
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    follows::FollowCache,
    relay::{Capabilities, RelayRegistry},
};

/// Overrides the directory holding config files.
pub const CONFIG_DIR_ENV: &str = "FANPOST_CONFIG_DIR";

/// Contents of one profile's config file.
///
/// ```json
/// {
///   "relays": { "wss://relay.example": { "read": true, "write": true, "search": false } },
///   "follows": { "<pubkey>": { "name": "alice" } },
///   "privatekey": "nsec1...",
///   "updated": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub relays: BTreeMap<String, Capabilities>,
    #[serde(flatten)]
    pub follows: FollowCache,
    #[serde(default)]
    pub privatekey: String,
    /// Optional SOCKS5 proxy (host:port) used for every relay connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Config {
    /// Relays for this invocation. A non-empty `override_relays` replaces the
    /// configured set with read+write entries; the file itself is untouched.
    pub fn registry(&self, override_relays: &[String]) -> RelayRegistry {
        if override_relays.is_empty() {
            RelayRegistry::new(self.relays.iter().map(|(url, caps)| (url.clone(), *caps)))
        } else {
            RelayRegistry::read_write(override_relays.iter().cloned())
        }
    }
}

/// Location of a profile's config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Directory holding every profile's config file.
    pub fn config_dir() -> Result<PathBuf> {
        if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let base = dirs::config_dir().context("locating user config directory")?;
        Ok(base.join("fanpost"))
    }

    /// `config.json` for the default profile, `config-<name>.json` otherwise.
    pub fn for_profile(dir: &Path, profile: Option<&str>) -> Self {
        let file = match profile.filter(|p| !p.is_empty()) {
            Some(name) => format!("config-{name}.json"),
            None => "config.json".to_string(),
        };
        Self {
            path: dir.join(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Config> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading config {}", self.path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", self.path.display()))
    }

    /// Write `config` pretty-printed, replacing the file atomically.
    pub fn save(&self, config: &Config) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).context("creating config directory")?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, config)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)
            .with_context(|| format!("writing config {}", self.path.display()))?;
        Ok(())
    }
}

/// Names of the non-default profiles found in `dir`, sorted.
pub fn list_profiles(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("listing profiles"),
    };
    let mut names = Vec::new();
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(profile) = name
            .strip_prefix("config-")
            .and_then(|rest| rest.strip_suffix(".json"))
        {
            if !profile.is_empty() {
                names.push(profile.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::Profile, relay::CapabilityRequest};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const SAMPLE: &str = r#"{
      "relays": {
        "wss://a": { "read": false, "write": true, "search": false },
        "wss://b": { "read": true, "write": true },
        "wss://c": { "search": true }
      },
      "follows": {
        "abcd": { "name": "alice", "display_name": "Alice" }
      },
      "privatekey": "0101010101010101010101010101010101010101010101010101010101010101",
      "updated": "2024-01-01T00:00:00Z"
    }"#;

    #[test]
    fn loads_json_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.json"), SAMPLE).unwrap();
        let store = ConfigStore::for_profile(dir.path(), None);
        let cfg = store.load().unwrap();

        assert_eq!(cfg.relays.len(), 3);
        assert!(cfg.relays["wss://c"].search);
        assert!(!cfg.relays["wss://c"].read);
        assert_eq!(cfg.follows.profile("abcd").unwrap().name, "alice");
        assert_eq!(
            cfg.follows.updated,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(cfg.proxy.is_none());

        let reg = cfg.registry(&[]);
        assert_eq!(reg.matching(CapabilityRequest::Search).len(), 1);
        assert_eq!(reg.matching(CapabilityRequest::Write).len(), 2);
    }

    #[test]
    fn save_round_trips_and_replaces_file() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::for_profile(&dir.path().join("nested"), Some("work"));
        let mut cfg = Config::default();
        cfg.relays.insert(
            "wss://r".into(),
            Capabilities {
                read: true,
                ..Capabilities::default()
            },
        );
        cfg.follows.follows.insert(
            "abcd".into(),
            Profile {
                name: "alice".into(),
                ..Profile::default()
            },
        );
        store.save(&cfg).unwrap();
        assert!(store.path().ends_with("config-work.json"));

        let loaded = store.load().unwrap();
        assert_eq!(loaded, cfg);

        cfg.privatekey = "changed".into();
        store.save(&cfg).unwrap();
        assert_eq!(store.load().unwrap().privatekey, "changed");
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"updated\""));
        assert!(!raw.contains("proxy"));
    }

    #[test]
    fn missing_config_errors() {
        let dir = tempdir().unwrap();
        let err = ConfigStore::for_profile(dir.path(), Some("nope"))
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("config-nope.json"));
    }

    #[test]
    fn relay_override_replaces_configured_relays() {
        let cfg: Config = serde_json::from_str(SAMPLE).unwrap();
        let reg = cfg.registry(&csv_strings("wss://x, ,wss://y,"));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.matching(CapabilityRequest::Read).len(), 2);
        assert_eq!(reg.matching(CapabilityRequest::Write).len(), 2);
        assert!(reg.matching(CapabilityRequest::Search).is_empty());
        assert_eq!(cfg.registry(&csv_strings("")).len(), 3);
    }

    #[test]
    fn lists_profiles() {
        let dir = tempdir().unwrap();
        for name in ["config.json", "config-work.json", "config-alt.json", "notes.txt"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        assert_eq!(list_profiles(dir.path()).unwrap(), vec!["alt", "work"]);
        assert!(list_profiles(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn config_dir_honours_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        env::set_var(CONFIG_DIR_ENV, dir.path());
        assert_eq!(ConfigStore::config_dir().unwrap(), dir.path());
        env::remove_var(CONFIG_DIR_ENV);
    }

    #[test]
    fn csv_helpers() {
        assert_eq!(csv_strings("a, b , ,c"), vec!["a", "b", "c"]);
        assert!(csv_strings("").is_empty());
    }
}
