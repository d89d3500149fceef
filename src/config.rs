//! Durable JSON-backed record of registered apps and global settings.
//!
//! The config lives in a single pretty-printed file (default `~/.quayrc`).
//! Loading migrates legacy camelCase field names in place, seeds the root
//! directory tree, and every other component reads and writes through the
//! resulting [`ConfigStore`]. Writes go temp-then-rename so a partial write
//! never clobbers the previous valid state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::QuayError;

/// Per-app options supplied at creation time. All fields are optional;
/// absence of `remote` means the app is deployed by direct git push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_uptime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    /// Anything else the user put in the config; passed through to the
    /// supervisor minus control-only keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Settings for the excluded dashboard front-end. Opaque to the core apart
/// from the port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub jsonp: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub apps: BTreeMap<String, AppOptions>,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_env: Option<String>,
    #[serde(default = "default_script")]
    pub default_script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_uptime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    #[serde(default = "default_supervisor_url")]
    pub supervisor_url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quay")
}

fn default_script() -> String {
    "app.js".to_string()
}

fn default_supervisor_url() -> String {
    "http://127.0.0.1:9615".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            apps: BTreeMap::new(),
            web: WebConfig::default(),
            env: BTreeMap::new(),
            node_env: None,
            default_script: default_script(),
            min_uptime: None,
            max_restarts: None,
            supervisor_url: default_supervisor_url(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Config file location: `QUAY_CONF` if set, else `~/.quayrc`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUAY_CONF") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quayrc")
}

/// Legacy field names and their current replacements, renamed at every
/// nesting level on load.
const LEGACY_FIELDS: [(&str, &str); 7] = [
    ("nodeEnv", "node_env"),
    ("defaultScript", "default_script"),
    ("fileOutput", "out_file"),
    ("fileError", "error_file"),
    ("pidFile", "pid_file"),
    ("minUptime", "min_uptime"),
    ("maxRestarts", "max_restarts"),
];

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: GlobalConfig,
}

impl ConfigStore {
    /// Load the config file, migrating legacy keys and seeding the root
    /// directory tree. An absent file is treated as empty; unparseable
    /// content fails with `ConfigCorrupt`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QuayError> {
        let path = path.into();
        let mut value = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|source| QuayError::ConfigCorrupt {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Value::Object(serde_json::Map::new())
            }
            Err(err) => return Err(err.into()),
        };

        let migrated = migrate_keys(&mut value);
        let mut config: GlobalConfig =
            serde_json::from_value(value).map_err(|source| QuayError::ConfigCorrupt {
                path: path.clone(),
                source,
            })?;

        // Root override for tests and ad-hoc deployments.
        if let Ok(root) = std::env::var("QUAY_ROOT_DIR") {
            config.root = PathBuf::from(root);
        }

        let store = Self { path, config };
        if migrated {
            // Persist the migrated form so migration runs at most once.
            store.save()?;
        }
        store.ensure_root_dirs()?;
        Ok(store)
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut GlobalConfig {
        &mut self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the full in-memory structure back to disk, pretty-printed
    /// with 4-space indent, via a temp file in the same directory.
    pub fn save(&self) -> Result<(), QuayError> {
        let data = to_pretty_json(&self.config)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Re-read from disk, discarding unsaved in-memory mutations. Lets
    /// long-lived processes pick up external edits.
    pub fn reload(&mut self) -> Result<&GlobalConfig, QuayError> {
        *self = Self::open(self.path.clone())?;
        Ok(&self.config)
    }

    fn ensure_root_dirs(&self) -> Result<(), QuayError> {
        std::fs::create_dir_all(&self.config.root)?;
        std::fs::create_dir_all(self.config.root.join("apps"))?;
        std::fs::create_dir_all(self.config.root.join("repos"))?;
        Ok(())
    }
}

/// Rename legacy fields at every nesting level. Returns whether anything
/// changed; a second pass over migrated data is a no-op.
pub fn migrate_keys(value: &mut Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    let mut changed = false;
    for (old, new) in LEGACY_FIELDS {
        if let Some(v) = map.remove(old) {
            map.insert(new.to_string(), v);
            changed = true;
        }
    }
    let nested: Vec<String> = map
        .iter()
        .filter(|(_, v)| v.is_object())
        .map(|(k, _)| k.clone())
        .collect();
    for key in nested {
        if let Some(v) = map.get_mut(&key) {
            changed |= migrate_keys(v);
        }
    }
    changed
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, QuayError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| QuayError::Other(e.into()))?;
    String::from_utf8(buf).map_err(|e| QuayError::Other(e.into()))
}
