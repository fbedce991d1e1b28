//! Utility functions for minikv-fleet

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Build a canonical connection string for `addresses` on `port`.
///
/// Addresses are sorted and deduplicated so every node derives the same
/// string from the same set. IPv6 literals are bracketed.
pub fn connection_string<S: AsRef<str>>(addresses: &[S], port: u16) -> String {
    let mut hosts: Vec<&str> = addresses
        .iter()
        .map(|a| a.as_ref().trim())
        .filter(|a| !a.is_empty())
        .collect();
    hosts.sort_unstable();
    hosts.dedup();

    hosts
        .into_iter()
        .map(|host| format!("https://{}:{}", bracket_host(host), port))
        .collect::<Vec<_>>()
        .join(",")
}

fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Rewrite the port of `url` from `old` to `new`.
///
/// Only the port token after the host is touched; a URL carrying a
/// different port is returned unchanged.
pub fn replace_port(url: &str, old: u16, new: u16) -> String {
    let (scheme, rest) = match url.find("://") {
        Some(idx) => (&url[..idx + 3], &url[idx + 3..]),
        None => ("", url),
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    match authority.rfind(':') {
        Some(idx) if !authority[idx..].contains(']') => {
            let (host, port) = (&authority[..idx], &authority[idx + 1..]);
            if port.parse::<u16>().ok() == Some(old) {
                format!("{}{}:{}{}", scheme, host, new, path)
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}

/// Parse duration string (e.g., "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let split = s.len() - s.chars().last().map(char::len_utf8).unwrap_or(1);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "d" => Duration::from_secs(num * 86400),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

/// Store version as reported by etcdctl
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl StoreVersion {
    /// Parse a dotted version; `"n/a"` and malformed strings yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().trim_start_matches('v').split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts
            .next()
            .map(|p| {
                let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .unwrap_or(0);
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// 2.x stores read the legacy environment-style config.
    pub fn uses_legacy_config(&self) -> bool {
        self.major < 3
    }

    /// etcdctl 3.3 renamed the TLS environment variables.
    pub fn has_short_tls_env(&self) -> bool {
        (self.major, self.minor) >= (3, 3)
    }
}

impl std::fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Pluralize "peer" the way status lines read.
pub fn peer_noun(count: usize) -> &'static str {
    if count == 1 {
        "peer"
    } else {
        "peers"
    }
}
