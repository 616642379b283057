// Evquell Config - TOML with Serde
// Raw file schema, CLI override merging, and validation into a run Config

use std::path::{Path, PathBuf};
use std::time::Duration;

use evdev_rs::enums::EV_KEY;
use serde::Deserialize;

use crate::caps::{EventSet, TYPE_ABS, TYPE_KEY, TYPE_LED, TYPE_MSC, TYPE_REL, TYPE_SND, TYPE_SW};
use crate::device::IdentityOverride;

/// Default suppression window after the last qualifying activity.
pub const DEFAULT_IDLE_MS: u64 = 750;

/// Modifier key codes excluded from the default activity set, so shortcuts
/// like ctrl+click keep working while `ignore_modifiers` is on.
const MODIFIER_KEYS: &[EV_KEY] = &[
    EV_KEY::KEY_LEFTCTRL,
    EV_KEY::KEY_RIGHTCTRL,
    EV_KEY::KEY_LEFTSHIFT,
    EV_KEY::KEY_RIGHTSHIFT,
    EV_KEY::KEY_LEFTALT,
    EV_KEY::KEY_RIGHTALT,
];

/// Configuration errors, all fatal before any device is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(String),

    #[error("idle_ms must be greater than zero")]
    ZeroIdle,

    #[error("no monitor device configured")]
    MissingMonitor,

    #[error("no filter device configured")]
    MissingFilter,

    #[error("invalid {section} rule: no event code {code:#x} under {kind}")]
    RuleOutOfRange {
        section: &'static str,
        kind: &'static str,
        code: u16,
    },
}

/// Raw file contents, prior to validation. Field-level merging of CLI
/// overrides happens on this form; `resolve` turns it into a `Config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Suppression window in milliseconds.
    pub idle_ms: Option<u64>,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub filter: FilterSection,

    #[serde(default)]
    pub clone: CloneSection,
}

/// The device watched for activity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorSection {
    /// Device path or exact device name.
    pub device: Option<String>,

    /// Codes that count as activity. Empty means every key.
    #[serde(default)]
    pub activity: RuleSection,

    /// Drop the standard modifier keys from the default activity set.
    /// Only shapes the default; an explicit `activity` list is taken as-is.
    pub ignore_modifiers: Option<bool>,
}

/// The device whose events are selectively suppressed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSection {
    /// Device path or exact device name.
    pub device: Option<String>,

    /// Codes eligible for dropping while filtering. Empty means every key.
    #[serde(default)]
    pub suppress: RuleSection,
}

/// Event codes grouped by event type. Synchronization records have no entry
/// here on purpose: they are never matchable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSection {
    #[serde(default)]
    pub key: Vec<u16>,
    #[serde(default)]
    pub rel: Vec<u16>,
    #[serde(default)]
    pub abs: Vec<u16>,
    #[serde(default)]
    pub msc: Vec<u16>,
    #[serde(default)]
    pub sw: Vec<u16>,
    #[serde(default)]
    pub led: Vec<u16>,
    #[serde(default)]
    pub snd: Vec<u16>,
}

impl RuleSection {
    fn is_empty(&self) -> bool {
        self.key.is_empty()
            && self.rel.is_empty()
            && self.abs.is_empty()
            && self.msc.is_empty()
            && self.sw.is_empty()
            && self.led.is_empty()
            && self.snd.is_empty()
    }

    fn build(&self, section: &'static str) -> Result<EventSet, ConfigError> {
        let mut set = EventSet::new();
        let groups: [(&'static str, u16, &[u16]); 7] = [
            ("key", TYPE_KEY, &self.key),
            ("rel", TYPE_REL, &self.rel),
            ("abs", TYPE_ABS, &self.abs),
            ("msc", TYPE_MSC, &self.msc),
            ("sw", TYPE_SW, &self.sw),
            ("led", TYPE_LED, &self.led),
            ("snd", TYPE_SND, &self.snd),
        ];
        for (kind, ev_type, codes) in groups {
            for &code in codes {
                if !set.insert(ev_type, code) {
                    return Err(ConfigError::RuleOutOfRange {
                        section,
                        kind,
                        code,
                    });
                }
            }
        }
        Ok(set)
    }
}

/// Identity fields to stamp on the clone instead of the source's.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloneSection {
    pub name: Option<String>,
    pub bustype: Option<u16>,
    pub vendor: Option<u16>,
    pub product: Option<u16>,
    pub version: Option<u16>,
}

impl ConfigFile {
    /// Default config location, `~/.config/evquell/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("evquell").join("config.toml"))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validate and commit to a run configuration. Nothing is taken from a
    /// partially valid file; the first problem aborts the whole load.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let idle_ms = self.idle_ms.unwrap_or(DEFAULT_IDLE_MS);
        if idle_ms == 0 {
            return Err(ConfigError::ZeroIdle);
        }

        let monitor_device = self
            .monitor
            .device
            .clone()
            .ok_or(ConfigError::MissingMonitor)?;
        let filter_device = self
            .filter
            .device
            .clone()
            .ok_or(ConfigError::MissingFilter)?;

        let activity = if self.monitor.activity.is_empty() {
            let mut keys = EventSet::all_of_type(TYPE_KEY);
            if self.monitor.ignore_modifiers.unwrap_or(true) {
                for key in MODIFIER_KEYS {
                    keys.remove(TYPE_KEY, *key as u16);
                }
            }
            keys
        } else {
            self.monitor.activity.build("monitor.activity")?
        };

        let suppress = if self.filter.suppress.is_empty() {
            EventSet::all_of_type(TYPE_KEY)
        } else {
            self.filter.suppress.build("filter.suppress")?
        };

        Ok(Config {
            monitor_device,
            filter_device,
            idle: Duration::from_millis(idle_ms),
            activity,
            suppress,
            clone_identity: IdentityOverride {
                name: self.clone.name.clone(),
                bustype: self.clone.bustype,
                vendor: self.clone.vendor,
                product: self.clone.product,
                version: self.clone.version,
            },
        })
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub monitor_device: String,
    pub filter_device: String,
    pub idle: Duration,
    pub activity: EventSet,
    pub suppress: EventSet,
    pub clone_identity: IdentityOverride,
}
