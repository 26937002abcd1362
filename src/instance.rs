//! Data model for registered federation instances.
//!
//! The types in this module mirror the structure of the registry documents
//! consumed by the sweep engine. `Instance` is the identity record created by
//! the registration workflow; its health fields are owned exclusively by the
//! health tracker. `InstanceMetadata` is fully replaced by the orchestrator
//! after every successful probe and is never partially merged.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bare hostname with an optional port, as stored in the registry.
static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*(:\d{1,5})?$")
        .expect("valid host pattern")
});

/// Public API dialect spoken by an instance.
///
/// The set is closed on purpose: each variant maps to exactly one
/// normalization routine in the probe, selected by the instance's stored
/// mode field.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApiMode {
    /// Mastodon-compatible REST API (`GET /api/v1/instance`).
    Mastodon,
    /// Misskey-compatible RPC API (`POST /api/meta`).
    Misskey
}

impl std::fmt::Display for ApiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mastodon => write!(f, "mastodon"),
            Self::Misskey => write!(f, "misskey")
        }
    }
}

impl std::str::FromStr for ApiMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mastodon" => Ok(Self::Mastodon),
            "misskey" => Ok(Self::Misskey),
            other => Err(format!("unsupported api mode '{other}'"))
        }
    }
}

/// Identity record for a registered instance.
///
/// Created once by the registration workflow. The sweep engine mutates only
/// the health fields (`failures`, `banned`, `ban_reason`); everything else is
/// treated as immutable input.
///
/// # Examples
///
/// ```
/// use fedidir::Instance;
///
/// let yaml = r"
/// host: social.example.org
/// name: Example Social
/// kind: general
/// mode: mastodon
/// ";
/// let instance: Instance = serde_yaml::from_str(yaml).expect("valid instance");
/// assert_eq!(instance.host, "social.example.org");
/// assert_eq!(instance.failures, 0);
/// assert!(!instance.banned);
/// ```
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Instance {
    /// Unique host identifier (domain, immutable key).
    pub host: String,

    /// Display name shown in the directory.
    #[serde(default)]
    pub name: String,

    /// Free-form category assigned at registration.
    #[serde(default)]
    pub kind: String,

    /// Whether the instance hosts predominantly NSFW content.
    #[serde(default)]
    pub nsfw: bool,

    /// API dialect used when probing the instance.
    pub mode: ApiMode,

    /// Whether the operator completed the verification workflow.
    #[serde(default)]
    pub verified: bool,

    /// Consecutive failed health checks since the last success.
    #[serde(default)]
    pub failures: u32,

    /// Whether the instance has been deactivated. Terminal within this
    /// crate's authority: banned instances are excluded from every sweep.
    #[serde(default)]
    pub banned: bool,

    /// Reason recorded when the instance was banned.
    #[serde(default)]
    pub ban_reason: Option<String>,

    /// Registration timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.host)
    }
}

/// Cached public metadata for an instance, one-to-one with [`Instance`].
///
/// Fully owned and overwritten by the sweep orchestrator on each successful
/// probe. Optional upstream fields are defaulted before this record is built,
/// so consumers never branch on absence.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct InstanceMetadata {
    /// Instance title as reported by its API.
    #[serde(default)]
    pub title: String,

    /// Instance description as reported by its API.
    #[serde(default)]
    pub description: String,

    /// Thumbnail reference: local path, remote URL or the placeholder
    /// sentinel. Never empty and never a rewrite-loop path.
    #[serde(default)]
    pub thumbnail: String,

    /// Registered user count.
    #[serde(default)]
    pub user_count: u64,

    /// Published status count.
    #[serde(default)]
    pub status_count: u64,

    /// Whether the instance currently accepts registrations.
    #[serde(default)]
    pub registrations_open: bool,

    /// Whether registrations require operator approval.
    #[serde(default)]
    pub approval_required: bool,

    /// Raw JSON snapshot of the last successful probe.
    #[serde(default)]
    pub cache: serde_json::Value
}

/// Checks whether a value is a plausible registry host.
///
/// Accepts bare lowercase hostnames with an optional port. Schemes, paths
/// and userinfo are rejected; probe URLs are derived from the host, not
/// stored in it.
///
/// # Examples
///
/// ```
/// use fedidir::is_valid_host;
///
/// assert!(is_valid_host("social.example.org"));
/// assert!(is_valid_host("localhost:3000"));
/// assert!(!is_valid_host("https://social.example.org"));
/// assert!(!is_valid_host(""));
/// ```
pub fn is_valid_host(host: &str) -> bool {
    HOST_PATTERN.is_match(host)
}
