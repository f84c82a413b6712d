//! Runtime settings, read from `FLEET_*` environment variables.

use std::time::Duration;

use fleet_core::NamespaceSet;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// Workers per controller queue.
    pub workers: usize,
    /// Handler replay period for every cache; `None` disables resync.
    pub resync: Option<Duration>,
    pub allow_namespaces: NamespaceSet,
    pub deny_namespaces: NamespaceSet,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub watch_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            resync: Some(Duration::from_secs(300)),
            allow_namespaces: NamespaceSet::all(),
            deny_namespaces: NamespaceSet::new(),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(300),
            watch_buffer: fleet_kubehub::denylist::DEFAULT_PROXY_BUFFER,
        }
    }
}

fn parse_num<T: std::str::FromStr>(var: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var, value = %raw, "config: ignoring unparsable value");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Config::default();
        if let Some(n) = parse_num::<usize>("FLEET_WORKERS", get("FLEET_WORKERS")) {
            cfg.workers = n.max(1);
        }
        if let Some(secs) = parse_num::<u64>("FLEET_RESYNC_SECS", get("FLEET_RESYNC_SECS")) {
            cfg.resync = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(list) = get("FLEET_ALLOW_NAMESPACES") {
            let set = NamespaceSet::parse_list(&list);
            cfg.allow_namespaces = if set.is_empty() { NamespaceSet::all() } else { set };
        }
        if let Some(list) = get("FLEET_DENY_NAMESPACES") {
            cfg.deny_namespaces = NamespaceSet::parse_list(&list);
        }
        if let Some(ms) = parse_num::<u64>("FLEET_BACKOFF_BASE_MS", get("FLEET_BACKOFF_BASE_MS")) {
            cfg.backoff_base = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = parse_num::<u64>("FLEET_BACKOFF_MAX_SECS", get("FLEET_BACKOFF_MAX_SECS")) {
            cfg.backoff_max = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = parse_num::<usize>("FLEET_WATCH_BUFFER", get("FLEET_WATCH_BUFFER")) {
            cfg.watch_buffer = n.max(1);
        }
        cfg
    }
}
