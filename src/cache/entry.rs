//! Cache entry records
//!
//! One entry per source commit. Entries are persisted as a JSON array in
//! recency order, index 0 being the most recently used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Installable package format produced by a kernel build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Debian binary package
    Deb,
}

impl PackageKind {
    /// File suffix every artifact of this kind carries
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Deb => ".deb",
        }
    }

    /// Whether a path names an artifact of this kind
    pub fn matches(&self, path: &str) -> bool {
        path.ends_with(self.suffix())
    }

    /// Whether a file name is the installable kernel image itself
    ///
    /// Header and debug-symbol packages share the image's naming scheme and
    /// must never be selected.
    pub fn is_primary(&self, file_name: &str) -> bool {
        match self {
            Self::Deb => {
                self.matches(file_name)
                    && file_name.contains("linux-image")
                    && !file_name.contains("dbg")
                    && !file_name.contains("headers")
            }
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deb => write!(f, "deb"),
        }
    }
}

/// Timestamps in the persisted cache: ISO-8601 UTC with a trailing `Z`
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Render a timestamp the way the cache file stores it
    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Parse RFC 3339, or a naive ISO value taken as UTC
    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s)))
    }
}

/// A cached build, keyed by commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source revision the packages were built from
    pub commit_id: String,

    /// `make kernelversion` output of the build tree
    pub kernel_version: String,

    /// Artifact format
    #[serde(alias = "package_type")]
    pub package_kind: PackageKind,

    /// Absolute paths of every artifact the build produced
    #[serde(alias = "package_paths")]
    pub artifact_paths: Vec<String>,

    /// When the build finished
    #[serde(with = "timestamp")]
    pub build_time: DateTime<Utc>,

    /// When the entry was last inserted or promoted
    #[serde(with = "timestamp")]
    pub last_used_time: DateTime<Utc>,

    /// Machine that ran the build
    #[serde(alias = "builder_vm")]
    pub builder_identity: String,

    /// OS of the build machine
    #[serde(alias = "os_distribution")]
    pub host_os_descriptor: String,
}

impl CacheEntry {
    /// Whether this entry is for the given key
    pub fn matches(&self, commit_id: &str, kernel_version: &str, kind: PackageKind) -> bool {
        self.commit_id == commit_id
            && self.kernel_version == kernel_version
            && self.package_kind == kind
    }

    /// Whether `other` is the same build of the same commit
    pub fn same_generation(&self, other: &CacheEntry) -> bool {
        self.commit_id == other.commit_id && self.build_time == other.build_time
    }

    /// Check the fields serde cannot
    pub fn validate(&self) -> Result<(), String> {
        if self.commit_id.trim().is_empty() {
            return Err("empty commit_id".to_string());
        }
        if self.artifact_paths.is_empty() {
            return Err(format!("no artifact paths for commit {}", self.commit_id));
        }
        if let Some(relative) = self.artifact_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(format!("artifact path is not absolute: {}", relative));
        }
        Ok(())
    }
}
