use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ClientConfig, ServiceRecord},
    errors::Error,
    Result,
};

/// Typed host configuration, read from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    // Storage
    pub database_path: PathBuf,
    pub config_file: Option<PathBuf>,

    // Sync
    pub sync_retry: Duration,
    pub sync_timeout: Duration,
    pub http_timeout: Duration,

    // Locking
    pub lock_stripes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("neb-store.json"),
            config_file: None,
            sync_retry: Duration::from_millis(10_000),
            sync_timeout: Duration::from_millis(30_000),
            http_timeout: Duration::from_secs(60),
            lock_stripes: 0,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Build from an arbitrary key lookup. Missing or malformed values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let u64_of = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let usize_of = |key: &str| lookup(key).and_then(|s| s.trim().parse::<usize>().ok());

        let database_path = lookup("NEB_DATABASE_PATH")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);
        let config_file = lookup("NEB_CONFIG_FILE")
            .and_then(non_empty)
            .map(PathBuf::from);

        let sync_retry = u64_of("NEB_SYNC_RETRY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_retry);
        let sync_timeout = u64_of("NEB_SYNC_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_timeout);
        let http_timeout = u64_of("NEB_HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let lock_stripes = usize_of("NEB_LOCK_STRIPES").unwrap_or(defaults.lock_stripes);

        Self {
            database_path,
            config_file,
            sync_retry,
            sync_timeout,
            http_timeout,
            lock_stripes,
        }
    }
}

/// Identities and services applied through the admin API at startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BootstrapFile {
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
}

/// Read a bootstrap file, expanding `${VAR}` placeholders in every string.
pub fn load_bootstrap(path: &Path) -> Result<BootstrapFile> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("malformed {}: {e}", path.display())))?;
    let interpolated = interpolate_env(value);
    serde_json::from_value(interpolated)
        .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))
}

fn interpolate_env(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::String(s) => serde_json::Value::String(interpolate_env_str(&s)),
        serde_json::Value::Array(xs) => {
            serde_json::Value::Array(xs.into_iter().map(interpolate_env).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, interpolate_env(v)))
                .collect(),
        ),
        other => other,
    }
}

// Unset variables expand to the empty string.
fn interpolate_env_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        out.push_str(&env::var(name).unwrap_or_default());
        rest = &rest[start + 2 + len + 1..];
    }
    out.push_str(rest);
    out
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
