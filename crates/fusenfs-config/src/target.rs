//! Remote target URLs.
//!
//! Targets look like `nfs://server/export/path?uid=1000&gid=1000`. A `uid` or
//! `gid` in the query string takes precedence over ids given on the command
//! line or in the config file.

use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// Transport named by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScheme {
    /// A network export reached through an external NFS transport.
    Nfs,
    /// An in-process loopback export, mostly useful for testing.
    Mem,
}

impl TargetScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetScheme::Nfs => "nfs",
            TargetScheme::Mem => "mem",
        }
    }
}

/// A parsed remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub scheme: TargetScheme,
    /// Server host (may carry a `:port` suffix).
    pub server: String,
    /// Export path, always absolute, without a trailing slash.
    pub export: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Remaining query parameters, in order of appearance.
    pub options: Vec<(String, String)>,
}

impl RemoteTarget {
    /// Parse a target URL.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTarget(url.to_string(), reason.to_string());

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://server/path"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "nfs" => TargetScheme::Nfs,
            "mem" => TargetScheme::Mem,
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        };

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (server, raw_path) = match location.find('/') {
            Some(idx) => (&location[..idx], &location[idx..]),
            None => (location, "/"),
        };
        if server.is_empty() && scheme == TargetScheme::Nfs {
            return Err(invalid("missing server"));
        }

        let decoded = urlencoding::decode(raw_path).map_err(|_| invalid("path is not valid UTF-8"))?;
        let export = normalize_export(&decoded);

        let mut target = RemoteTarget {
            scheme,
            server: server.to_string(),
            export,
            uid: None,
            gid: None,
            options: Vec::new(),
        };

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "uid" => {
                    target.uid = Some(
                        value
                            .parse()
                            .map_err(|_| invalid(&format!("uid '{}' is not a number", value)))?,
                    )
                }
                "gid" => {
                    target.gid = Some(
                        value
                            .parse()
                            .map_err(|_| invalid(&format!("gid '{}' is not a number", value)))?,
                    )
                }
                _ => target.options.push((key.to_string(), value.to_string())),
            }
        }

        Ok(target)
    }
}

fn normalize_export(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl FromStr for RemoteTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RemoteTarget::parse(s)
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.server, self.export)
    }
}
