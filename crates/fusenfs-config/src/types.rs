use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default `max_write` handed to the kernel, in bytes.
pub const DEFAULT_MAX_WRITE: u32 = 32768;

/// Worker threads serving kernel requests when `multithread` is on.
pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Default FUSE subtype (shown by the kernel as `fuse.fuse-nfs`).
pub const DEFAULT_SUBTYPE: &str = "fuse-nfs";

/// Default bound on a single drive-loop poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound accepted for `drive.poll_timeout`.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level mount configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountConfig {
    /// Remote export URL, e.g. `nfs://server/export?uid=1000&gid=1000`.
    #[serde(default)]
    pub target: Option<String>,
    /// Local directory the export is mounted on.
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,
    /// Outgoing RPC credential settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Kernel mount options.
    #[serde(default)]
    pub fuse: FuseConfig,
    /// Drive loop tuning.
    #[serde(default)]
    pub drive: DriveConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credential override settings.
///
/// When `uid`/`gid` are set, they replace the caller's identity in outgoing
/// RPC credentials. With `allow_other_own_ids`, callers other than the user
/// who mounted the export keep their own ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub allow_other_own_ids: bool,
}

impl IdentityConfig {
    /// True if either half of an override identity is configured.
    pub fn has_override(&self) -> bool {
        self.uid.is_some() || self.gid.is_some()
    }
}

/// Options passed to the kernel when mounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuseConfig {
    #[serde(default)]
    pub allow_other: bool,
    #[serde(default)]
    pub allow_root: bool,
    /// Let the kernel enforce permission bits. On by default for
    /// compatibility with older fuse-nfs releases.
    #[serde(default = "default_true")]
    pub default_permissions: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_true")]
    pub auto_unmount: bool,
    /// Filesystem name shown in `mount` output (defaults to the target).
    #[serde(default)]
    pub fsname: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default = "default_max_write")]
    pub max_write: u32,
    /// Bypass the page cache for file I/O.
    #[serde(default)]
    pub direct_io: bool,
    /// How long the kernel may cache name lookups.
    #[serde(default = "default_ttl")]
    pub entry_timeout: HumanDuration,
    /// How long the kernel may cache attributes.
    #[serde(default = "default_ttl")]
    pub attr_timeout: HumanDuration,
    /// Serve kernel requests from a worker pool instead of one thread.
    #[serde(default)]
    pub multithread: bool,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Owner uid the kernel reports for every file (FUSE `uid=` option).
    #[serde(default)]
    pub uid: Option<u32>,
    /// Owner gid the kernel reports for every file (FUSE `gid=` option).
    #[serde(default)]
    pub gid: Option<u32>,
}

impl Default for FuseConfig {
    fn default() -> Self {
        FuseConfig {
            allow_other: false,
            allow_root: false,
            default_permissions: true,
            read_only: false,
            auto_unmount: true,
            fsname: None,
            subtype: None,
            max_write: DEFAULT_MAX_WRITE,
            direct_io: false,
            entry_timeout: default_ttl(),
            attr_timeout: default_ttl(),
            multithread: false,
            worker_threads: DEFAULT_WORKER_THREADS,
            uid: None,
            gid: None,
        }
    }
}

/// Drive loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriveConfig {
    /// Longest time one waiter may hold the drive token inside `poll(2)`.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: HumanDuration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            poll_timeout: default_poll_timeout(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Append logs to this file in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            file: None,
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_write() -> u32 {
    DEFAULT_MAX_WRITE
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_ttl() -> HumanDuration {
    HumanDuration(Duration::from_secs(1))
}

fn default_poll_timeout() -> HumanDuration {
    HumanDuration(DEFAULT_POLL_TIMEOUT)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Human-readable duration (e.g., "200ms", "5s", "1m").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
            (num, "ms")
        } else if let Some(num) = s.strip_suffix('s') {
            (num, "s")
        } else if let Some(num) = s.strip_suffix('m') {
            (num, "m")
        } else if let Some(num) = s.strip_suffix('h') {
            (num, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" => Duration::from_secs(num * 60),
            "h" => Duration::from_secs(num * 3600),
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 {
            write!(f, "{}ms", millis)
        } else if secs < 60 || secs % 60 != 0 {
            write!(f, "{}s", secs)
        } else if secs < 3600 || secs % 3600 != 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}h", secs / 3600)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_parse() {
        assert_eq!(
            HumanDuration::from_str("200ms").unwrap().as_duration(),
            Duration::from_millis(200)
        );
        assert_eq!(
            HumanDuration::from_str("5s").unwrap().as_duration(),
            Duration::from_secs(5)
        );
        assert_eq!(
            HumanDuration::from_str("5m").unwrap().as_duration(),
            Duration::from_secs(300)
        );
        assert_eq!(
            HumanDuration::from_str("1h").unwrap().as_duration(),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_human_duration_parse_errors() {
        assert!(HumanDuration::from_str("fast").is_err());
        assert!(HumanDuration::from_str("10").is_err());
        assert!(HumanDuration::from_str("-1s").is_err());
    }

    #[test]
    fn test_human_duration_display_round_trips_units() {
        assert_eq!(HumanDuration(Duration::from_millis(1500)).to_string(), "1500ms");
        assert_eq!(HumanDuration(Duration::from_secs(90)).to_string(), "90s");
        assert_eq!(HumanDuration(Duration::from_secs(120)).to_string(), "2m");
        assert_eq!(HumanDuration(Duration::from_secs(7200)).to_string(), "2h");
    }

    #[test]
    fn test_fuse_config_defaults() {
        let fuse = FuseConfig::default();
        assert!(fuse.default_permissions);
        assert!(fuse.auto_unmount);
        assert!(!fuse.allow_other);
        assert_eq!(fuse.max_write, DEFAULT_MAX_WRITE);
        assert!(!fuse.multithread);
        assert_eq!(fuse.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!((fuse.uid, fuse.gid), (None, None));
        assert_eq!(fuse.attr_timeout.as_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_identity_has_override() {
        assert!(!IdentityConfig::default().has_override());
        let partial = IdentityConfig {
            gid: Some(100),
            ..Default::default()
        };
        assert!(partial.has_override());
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = MountConfig {
            target: Some("nfs://filer/export".to_string()),
            mountpoint: Some(PathBuf::from("/mnt/filer")),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: MountConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
