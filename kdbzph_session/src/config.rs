use crate::connection::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url {url:?}: {source}")]
    BadUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("unsupported server scheme {0:?} (expected http, https, ws or wss)")]
    BadScheme(String),
    #[error("invalid value for {key}: {value:?}")]
    BadValue { key: &'static str, value: String },
}

/// What to do with a reply that arrives while nothing is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    #[default]
    Display,
    Discard,
}

impl FromStr for OrphanPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "display" | "show" => Ok(OrphanPolicy::Display),
            "discard" | "drop" => Ok(OrphanPolicy::Discard),
            _ => Err(ConfigError::BadValue {
                key: "orphans",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "exp" | "exponential" => Ok(BackoffKind::Exponential),
            _ => Err(ConfigError::BadValue {
                key: "backoff",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server root; the session socket and batch endpoints hang off it.
    pub server: Url,
    pub history_file: Option<PathBuf>,
    pub reconnect: ReconnectPolicy,
    pub orphans: OrphanPolicy,
}

impl SessionConfig {
    pub fn new(server: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            server: parse_server(server)?,
            history_file: None,
            reconnect: ReconnectPolicy::default(),
            orphans: OrphanPolicy::default(),
        })
    }

    /// Defaults overridden by `KDBZPH_SERVER`, `KDBZPH_HISTORY_FILE`,
    /// `KDBZPH_RECONNECT_MS`, `KDBZPH_BACKOFF` and `KDBZPH_ORPHANS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server = lookup("KDBZPH_SERVER").unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let mut cfg = Self::new(&server)?;
        cfg.history_file = lookup("KDBZPH_HISTORY_FILE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let delay = match lookup("KDBZPH_RECONNECT_MS") {
            Some(ms) => Duration::from_millis(ms.trim().parse().map_err(|_| {
                ConfigError::BadValue {
                    key: "KDBZPH_RECONNECT_MS",
                    value: ms.clone(),
                }
            })?),
            None => DEFAULT_RECONNECT_DELAY,
        };
        let kind = match lookup("KDBZPH_BACKOFF") {
            Some(s) => s.parse()?,
            None => BackoffKind::default(),
        };
        cfg.reconnect = reconnect_policy(kind, delay);

        if let Some(s) = lookup("KDBZPH_ORPHANS") {
            cfg.orphans = s.parse()?;
        }
        Ok(cfg)
    }

    pub fn set_server(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.server = parse_server(raw)?;
        Ok(())
    }

    /// Session endpoint: the server root with the scheme switched to ws/wss.
    pub fn ws_url(&self) -> Url {
        let mut url = self.server.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // http<->ws and https<->wss are all special schemes, so this cannot fail.
        let _ = url.set_scheme(scheme);
        url.set_path("/");
        url.set_query(None);
        url
    }

    /// Base for the batch endpoints: the server root with http/https.
    pub fn http_url(&self) -> Url {
        let mut url = self.server.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "https",
            _ => "http",
        };
        let _ = url.set_scheme(scheme);
        url.set_path("/");
        url.set_query(None);
        url
    }
}

pub fn reconnect_policy(kind: BackoffKind, delay: Duration) -> ReconnectPolicy {
    match kind {
        BackoffKind::Fixed => ReconnectPolicy::Fixed(delay),
        BackoffKind::Exponential => ReconnectPolicy::Exponential {
            base: delay,
            cap: BACKOFF_CAP.max(delay),
            jitter: true,
        },
    }
}

fn parse_server(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|source| ConfigError::BadUrl {
        url: trimmed.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::BadScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.ws_url().as_str(), "ws://127.0.0.1:5000/");
        assert_eq!(cfg.http_url().as_str(), "http://127.0.0.1:5000/");
        assert_eq!(cfg.reconnect, ReconnectPolicy::Fixed(Duration::from_millis(3000)));
        assert_eq!(cfg.orphans, OrphanPolicy::Display);
        assert!(cfg.history_file.is_none());
    }

    #[test]
    fn env_overrides() {
        let cfg = SessionConfig::from_lookup(lookup(&[
            ("KDBZPH_SERVER", "https://q.example.com/repl?x=1"),
            ("KDBZPH_RECONNECT_MS", "250"),
            ("KDBZPH_BACKOFF", "exponential"),
            ("KDBZPH_ORPHANS", "discard"),
            ("KDBZPH_HISTORY_FILE", "/tmp/h.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.ws_url().as_str(), "wss://q.example.com/");
        assert_eq!(cfg.http_url().as_str(), "https://q.example.com/");
        assert_eq!(
            cfg.reconnect,
            ReconnectPolicy::Exponential {
                base: Duration::from_millis(250),
                cap: Duration::from_secs(30),
                jitter: true
            }
        );
        assert_eq!(cfg.orphans, OrphanPolicy::Discard);
        assert_eq!(cfg.history_file, Some(PathBuf::from("/tmp/h.json")));
    }

    #[test]
    fn ws_server_maps_back_to_http() {
        let cfg = SessionConfig::new("ws://localhost:9000").unwrap();
        assert_eq!(cfg.http_url().as_str(), "http://localhost:9000/");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            SessionConfig::new("ftp://x"),
            Err(ConfigError::BadScheme(_))
        ));
        assert!(matches!(
            SessionConfig::new("not a url"),
            Err(ConfigError::BadUrl { .. })
        ));
        assert!(SessionConfig::from_lookup(lookup(&[("KDBZPH_RECONNECT_MS", "soon")])).is_err());
        assert!("sometimes".parse::<OrphanPolicy>().is_err());
    }
}
