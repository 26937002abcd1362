// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// One-attempt metadata fetch against a remote instance's public API.
///
/// The probe performs exactly one outbound request per call and never
/// returns an error across its boundary: any transport failure, non-2xx
/// status or malformed payload collapses into [`ProbeOutcome::Unreachable`].
/// Retry policy lives with the orchestrator's failure counter, not here.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::ProbeSettings,
    error::Error,
    instance::ApiMode,
    thumbnail::PLACEHOLDER_THUMBNAIL,
};

/// Canonical metadata record produced by a successful probe.
///
/// Every optional upstream field is defaulted here, so downstream consumers
/// never branch on absence: a missing thumbnail becomes the placeholder
/// sentinel, missing counts become zero, missing flags fall back to each
/// dialect's documented default.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct InstanceSnapshot {
    /// Instance title as reported by its API.
    pub title: String,
    /// Instance description as reported by its API.
    pub description: String,
    /// Thumbnail reference reported by the API, or the placeholder sentinel.
    pub thumbnail: String,
    /// Registered user count.
    pub user_count: u64,
    /// Published status count.
    pub status_count: u64,
    /// Whether the instance currently accepts registrations.
    pub registrations_open: bool,
    /// Whether registrations require operator approval.
    pub approval_required: bool,
    /// Contact account identifier, consumed by the verification workflow.
    pub contact_account: Option<String>,
    /// Raw JSON payload of the probe, persisted as the cache blob.
    pub raw: Value
}

/// Result of one probe attempt.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// The instance answered and its payload normalized cleanly.
    Online(InstanceSnapshot),
    /// The instance could not be reached or did not produce usable data.
    Unreachable {
        /// Human readable description of the failure, for logs only.
        reason: String
    }
}

/// Builds the shared HTTP client used for probes and notifications.
///
/// The timeout bounds every request so a single unresponsive instance
/// cannot stall a sweep.
///
/// # Errors
///
/// Returns [`Error::Service`] when the client cannot be constructed.
pub fn build_client(settings: &ProbeSettings) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
        .map_err(|e| Error::service(format!("failed to build http client: {e}")))
}

/// Performs one probe attempt against `host` using the given dialect.
///
/// Hosts are bare domains and get `https://` prefixed; a host already
/// carrying a scheme is used verbatim, which keeps loopback servers
/// reachable in tests.
///
/// # Parameters
///
/// * `client` - Shared HTTP client carrying the timeout bound.
/// * `host` - Host identifier of the instance.
/// * `mode` - API dialect stored for the instance.
pub async fn probe(client: &reqwest::Client, host: &str, mode: ApiMode) -> ProbeOutcome {
    let base = if host.contains("://") {
        host.trim_end_matches('/').to_owned()
    } else {
        format!("https://{host}")
    };

    let request = match mode {
        ApiMode::Mastodon => client.get(format!("{base}/api/v1/instance")),
        ApiMode::Misskey => {
            client.post(format!("{base}/api/meta")).json(&serde_json::json!({"detail": true}))
        }
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("{host} unreachable: {e}");
            return ProbeOutcome::Unreachable {
                reason: format!("request failed: {e}")
            };
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!("{host} answered with status {status}");
        return ProbeOutcome::Unreachable {
            reason: format!("unexpected status {status}")
        };
    }

    let payload: Value = match response.json().await {
        Ok(payload) => payload,
        Err(e) => {
            warn!("{host} returned an unreadable payload: {e}");
            return ProbeOutcome::Unreachable {
                reason: format!("unreadable payload: {e}")
            };
        }
    };

    match normalize_payload(mode, payload) {
        Ok(snapshot) => {
            debug!("{host} online: {} users", snapshot.user_count);
            ProbeOutcome::Online(snapshot)
        }
        Err(e) => {
            warn!("{host} returned a malformed {mode} payload: {e}");
            ProbeOutcome::Unreachable {
                reason: format!("malformed payload: {e}")
            }
        }
    }
}

/// Normalizes a raw dialect payload into the canonical snapshot.
///
/// Exposed separately from [`probe`] so payload handling stays testable
/// without a network.
///
/// # Errors
///
/// Returns the underlying deserialization error when the payload does not
/// match the dialect's shape.
pub fn normalize_payload(mode: ApiMode, raw: Value) -> Result<InstanceSnapshot, serde_json::Error> {
    match mode {
        ApiMode::Mastodon => {
            let payload: MastodonInstancePayload = serde_json::from_value(raw.clone())?;
            Ok(normalize_mastodon(payload, raw))
        }
        ApiMode::Misskey => {
            let payload: MisskeyMetaPayload = serde_json::from_value(raw.clone())?;
            Ok(normalize_misskey(payload, raw))
        }
    }
}

/// Shape of `GET /api/v1/instance` on Mastodon-compatible servers.
#[derive(Debug, Default, Deserialize)]
struct MastodonInstancePayload {
    #[serde(default)]
    title:             Option<String>,
    #[serde(default)]
    description:       Option<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    thumbnail:         Option<String>,
    #[serde(default)]
    stats:             MastodonStats,
    #[serde(default)]
    registrations:     Option<bool>,
    #[serde(default)]
    approval_required: Option<bool>,
    #[serde(default)]
    contact_account:   Option<MastodonAccount>
}

#[derive(Debug, Default, Deserialize)]
struct MastodonStats {
    #[serde(default)]
    user_count:   Option<u64>,
    #[serde(default)]
    status_count: Option<u64>
}

#[derive(Debug, Default, Deserialize)]
struct MastodonAccount {
    #[serde(default)]
    acct: Option<String>
}

/// Shape of `POST /api/meta` on Misskey-compatible servers.
///
/// User and note counts are not part of `meta` on all server versions;
/// absent counts normalize to zero rather than costing a second request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MisskeyMetaPayload {
    #[serde(default)]
    name:                         Option<String>,
    #[serde(default)]
    description:                  Option<String>,
    #[serde(default)]
    banner_url:                   Option<String>,
    #[serde(default)]
    icon_url:                     Option<String>,
    #[serde(default)]
    disable_registration:         Option<bool>,
    #[serde(default)]
    approval_required_for_signup: Option<bool>,
    #[serde(default)]
    maintainer_name:              Option<String>,
    #[serde(default)]
    original_users_count:         Option<u64>,
    #[serde(default)]
    original_notes_count:         Option<u64>
}

fn normalize_mastodon(payload: MastodonInstancePayload, raw: Value) -> InstanceSnapshot {
    let description = payload
        .short_description
        .filter(|text| !text.is_empty())
        .or(payload.description)
        .unwrap_or_default();

    InstanceSnapshot {
        title: payload.title.unwrap_or_default(),
        description,
        thumbnail: payload
            .thumbnail
            .filter(|reference| !reference.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_THUMBNAIL.to_owned()),
        user_count: payload.stats.user_count.unwrap_or(0),
        status_count: payload.stats.status_count.unwrap_or(0),
        registrations_open: payload.registrations.unwrap_or(false),
        approval_required: payload.approval_required.unwrap_or(false),
        contact_account: payload.contact_account.and_then(|account| account.acct),
        raw
    }
}

fn normalize_misskey(payload: MisskeyMetaPayload, raw: Value) -> InstanceSnapshot {
    InstanceSnapshot {
        title: payload.name.unwrap_or_default(),
        description: payload.description.unwrap_or_default(),
        thumbnail: payload
            .banner_url
            .or(payload.icon_url)
            .filter(|reference| !reference.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_THUMBNAIL.to_owned()),
        user_count: payload.original_users_count.unwrap_or(0),
        status_count: payload.original_notes_count.unwrap_or(0),
        registrations_open: !payload.disable_registration.unwrap_or(false),
        approval_required: payload.approval_required_for_signup.unwrap_or(false),
        contact_account: payload.maintainer_name,
        raw
    }
}
