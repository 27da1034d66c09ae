//! Daemon configuration: `incumbent.toml` plus command-line overrides.
//!
//! Every setting resolves in the same order: command-line flag, then the
//! config file, then the built-in default.
//!
//! ```toml
//! identity = "pod-a"
//! listen = "0.0.0.0:8080"
//! store = "redb:/var/lib/incumbent/leases.redb"
//! log_json = true
//!
//! [election]
//! scope = "default"
//! lease_name = "controller-lock"
//! lease_duration = "15s"
//! renew_deadline = "10s"
//! retry_period = "2s"
//! worker_grace = "5s"
//! release_on_cancel = true
//! rejoin_after_demotion = false
//!
//! [workers]
//! count = 2
//! interval = "5s"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use incumbent_election::ElectionConfig;
use incumbent_state::LeaseKey;

use crate::store::StoreSpec;

pub const DEFAULT_SCOPE: &str = "default";
pub const DEFAULT_LEASE_NAME: &str = "incumbent";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_WORKER_INTERVAL: Duration = Duration::from_secs(5);

/// Contents of the config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub identity: Option<String>,
    pub listen: Option<SocketAddr>,
    pub store: Option<String>,
    pub log_json: Option<bool>,
    #[serde(default)]
    pub election: ElectionSection,
    #[serde(default)]
    pub workers: WorkersSection,
}

/// The `[election]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionSection {
    pub scope: Option<String>,
    pub lease_name: Option<String>,
    pub lease_duration: Option<String>,
    pub renew_deadline: Option<String>,
    pub retry_period: Option<String>,
    pub worker_grace: Option<String>,
    pub release_on_cancel: Option<bool>,
    pub rejoin_after_demotion: Option<bool>,
}

/// The `[workers]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersSection {
    pub count: Option<usize>,
    pub interval: Option<String>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if given, otherwise start from an empty file config.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// Which lease, in which store. Shared by `run` and `holder`.
#[derive(Debug, Clone, Default)]
pub struct LeaseOverrides {
    pub scope: Option<String>,
    pub lease_name: Option<String>,
    pub store: Option<String>,
}

/// Command-line values for `run`. `None` and `false` mean "not given".
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub lease: LeaseOverrides,
    pub identity: Option<String>,
    pub lease_duration: Option<Duration>,
    pub renew_deadline: Option<Duration>,
    pub retry_period: Option<Duration>,
    pub worker_grace: Option<Duration>,
    pub listen: Option<SocketAddr>,
    pub workers: Option<usize>,
    pub worker_interval: Option<Duration>,
    pub rejoin_after_demotion: bool,
    pub no_release_on_cancel: bool,
    pub log_json: bool,
}

/// Fully resolved settings for `run`.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub identity: String,
    pub key: LeaseKey,
    pub store: StoreSpec,
    pub listen: SocketAddr,
    pub election: ElectionConfig,
    pub workers: usize,
    pub worker_interval: Duration,
    pub log_json: bool,
}

/// Resolve the lease key and store for either subcommand.
pub fn resolve_lease(
    overrides: &LeaseOverrides,
    file: &FileConfig,
) -> anyhow::Result<(LeaseKey, StoreSpec)> {
    let scope = overrides
        .scope
        .clone()
        .or_else(|| file.election.scope.clone())
        .unwrap_or_else(|| DEFAULT_SCOPE.to_string());
    let name = overrides
        .lease_name
        .clone()
        .or_else(|| file.election.lease_name.clone())
        .unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string());
    let key = LeaseKey::new(scope, name)?;

    let store = match overrides.store.as_deref().or(file.store.as_deref()) {
        Some(spec) => spec.parse()?,
        None => StoreSpec::Memory,
    };
    Ok((key, store))
}

/// Resolve everything `run` needs.
///
/// `env` looks up environment variables; it is a parameter so tests do
/// not depend on the process environment.
pub fn resolve(
    overrides: &RunOverrides,
    file: &FileConfig,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<DaemonConfig> {
    let (key, store) = resolve_lease(&overrides.lease, file)?;

    let identity = match overrides.identity.clone().or_else(|| file.identity.clone()) {
        Some(identity) if identity.trim().is_empty() => bail!("identity must not be empty"),
        Some(identity) => identity,
        None => default_identity(env),
    };

    let defaults = ElectionConfig::default();
    let section = &file.election;
    let election = ElectionConfig {
        lease_duration: pick_duration(
            overrides.lease_duration,
            section.lease_duration.as_deref(),
            defaults.lease_duration,
            "election.lease_duration",
        )?,
        renew_deadline: pick_duration(
            overrides.renew_deadline,
            section.renew_deadline.as_deref(),
            defaults.renew_deadline,
            "election.renew_deadline",
        )?,
        retry_period: pick_duration(
            overrides.retry_period,
            section.retry_period.as_deref(),
            defaults.retry_period,
            "election.retry_period",
        )?,
        worker_grace: pick_duration(
            overrides.worker_grace,
            section.worker_grace.as_deref(),
            defaults.worker_grace,
            "election.worker_grace",
        )?,
        release_on_cancel: !overrides.no_release_on_cancel
            && section.release_on_cancel.unwrap_or(defaults.release_on_cancel),
        // The daemon stops after a demotion unless told to rejoin; its
        // health endpoint keeps failing either way.
        stop_on_demotion: !(overrides.rejoin_after_demotion
            || section.rejoin_after_demotion.unwrap_or(false)),
    };
    election.validate()?;

    let listen = match overrides.listen.or(file.listen) {
        Some(listen) => listen,
        None => DEFAULT_LISTEN.parse()?,
    };

    let worker_interval = pick_duration(
        overrides.worker_interval,
        file.workers.interval.as_deref(),
        DEFAULT_WORKER_INTERVAL,
        "workers.interval",
    )?;
    if worker_interval.is_zero() {
        bail!("workers.interval must be greater than zero");
    }

    Ok(DaemonConfig {
        identity,
        key,
        store,
        listen,
        election,
        workers: overrides
            .workers
            .or(file.workers.count)
            .unwrap_or(DEFAULT_WORKERS),
        worker_interval,
        log_json: overrides.log_json || file.log_json.unwrap_or(false),
    })
}

/// `POD_NAME`, then `HOSTNAME`, then `incumbent-<pid>`.
pub fn default_identity(env: impl Fn(&str) -> Option<String>) -> String {
    ["POD_NAME", "HOSTNAME"]
        .into_iter()
        .filter_map(|var| env(var))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| format!("incumbent-{}", std::process::id()))
}

fn pick_duration(
    flag: Option<Duration>,
    file: Option<&str>,
    default: Duration,
    field: &str,
) -> anyhow::Result<Duration> {
    if let Some(flag) = flag {
        return Ok(flag);
    }
    match file {
        Some(raw) => parse_duration(raw)
            .with_context(|| format!("{field}: invalid duration {raw:?} (expected e.g. 500ms, 15s, 2m)")),
        None => Ok(default),
    }
}

/// Parse a duration string like "5s", "500ms", "1m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// `parse_duration` for clap's `value_parser`.
pub fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {s:?} (expected e.g. 500ms, 15s, 2m)"))
}
