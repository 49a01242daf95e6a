//! Load config from file and environment.

use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use sara_core::protocol::{MULTICAST_V4, MULTICAST_V6, PORT};
use tracing::warn;

/// Daemon configuration. File: ~/.config/saratoga/config.toml or /etc/saratoga/config.toml.
/// Env overrides: SARATOGA_PORT, SARATOGA_BEACON_COUNT, SARATOGA_BEACON_INTERVAL,
/// SARATOGA_BEACON_FLAGS, SARATOGA_WORKING_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP port for every frame (default 7542).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_multicast_v4")]
    pub multicast_v4: Ipv4Addr,
    #[serde(default = "default_multicast_v6")]
    pub multicast_v6: Ipv6Addr,
    /// Beacon options string, e.g. "descriptor=d64,freespace=yes".
    #[serde(default = "default_beacon_flags")]
    pub beacon_flags: String,
    /// Copies per beacon burst (minimum 1).
    #[serde(default = "default_beacon_count")]
    pub beacon_count: u32,
    /// Seconds between copies inside a burst.
    #[serde(default = "default_beacon_interval")]
    pub beacon_interval_secs: u64,
    /// Seconds between bursts.
    #[serde(default = "default_beacon_period")]
    pub beacon_period_secs: u64,
    /// Directory whose free space is advertised; current directory when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    PORT
}
fn default_multicast_v4() -> Ipv4Addr {
    MULTICAST_V4
}
fn default_multicast_v6() -> Ipv6Addr {
    MULTICAST_V6
}
fn default_beacon_flags() -> String {
    "descriptor=d64,txwilling=on,rxwilling=on,freespace=yes".to_string()
}
fn default_beacon_count() -> u32 {
    1
}
fn default_beacon_interval() -> u64 {
    1
}
fn default_beacon_period() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            multicast_v4: default_multicast_v4(),
            multicast_v6: default_multicast_v6(),
            beacon_flags: default_beacon_flags(),
            beacon_count: default_beacon_count(),
            beacon_interval_secs: default_beacon_interval(),
            beacon_period_secs: default_beacon_period(),
            working_dir: None,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c.beacon_count = c.beacon_count.max(1);
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("SARATOGA_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.port = p;
    }
    if let Some(n) = var("SARATOGA_BEACON_COUNT").and_then(|s| s.parse::<u32>().ok()) {
        c.beacon_count = n;
    }
    if let Some(n) = var("SARATOGA_BEACON_INTERVAL").and_then(|s| s.parse::<u64>().ok()) {
        c.beacon_interval_secs = n;
    }
    if let Some(s) = var("SARATOGA_BEACON_FLAGS") {
        c.beacon_flags = s;
    }
    if let Some(s) = var("SARATOGA_WORKING_DIR") {
        c.working_dir = Some(PathBuf::from(s));
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/saratoga/config.toml"));
    }
    out.push(PathBuf::from("/etc/saratoga/config.toml"));
    out
}

/// First existing config file wins; a file that fails to parse is logged and ignored.
fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    parse_file(&path)
}

fn parse_file(path: &Path) -> Option<Config> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config");
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}
