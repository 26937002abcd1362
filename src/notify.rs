// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Best-effort cache invalidation after a completed sweep.
///
/// The notifier carries a fixed list of channels built from configuration.
/// Each channel is attempted independently: one channel failing never skips
/// the others, and all channels failing never fails the sweep. The outcome
/// is informational only.
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::NotifySettings;

/// One invalidation channel with its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationChannel {
    /// Tag-based cache purge.
    TagPurge {
        /// Purge endpoint.
        url: String
    },
    /// Path-based cache purge.
    PathPurge {
        /// Purge endpoint.
        url: String
    },
    /// Direct refresh signal for dependent services.
    DownstreamHook {
        /// Hook endpoint.
        url: String
    }
}

impl InvalidationChannel {
    /// Short channel name used in logs.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::TagPurge { .. } => "tag purge",
            Self::PathPurge { .. } => "path purge",
            Self::DownstreamHook { .. } => "downstream hook"
        }
    }

    fn url(&self) -> &str {
        match self {
            Self::TagPurge {
                url
            }
            | Self::PathPurge {
                url
            }
            | Self::DownstreamHook {
                url
            } => url
        }
    }

    fn body(&self) -> Value {
        match self {
            Self::TagPurge { .. } => json!({"tags": ["instances"]}),
            Self::PathPurge { .. } => json!({"paths": ["/", "/instances"]}),
            Self::DownstreamHook { .. } => json!({"event": "instances_updated"})
        }
    }
}

/// Aggregate result of one notification round, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Channels that were attempted.
    pub attempted: usize,
    /// Channels whose attempt failed.
    pub failed: usize
}

/// Fires "directory changed" signals to all configured channels.
#[derive(Debug, Clone)]
pub struct InvalidationNotifier {
    client:   Client,
    channels: Vec<InvalidationChannel>
}

impl InvalidationNotifier {
    /// Builds the notifier from configuration; unset endpoints are skipped.
    pub fn new(client: Client, settings: &NotifySettings) -> Self {
        let mut channels = Vec::with_capacity(3);

        if let Some(url) = settings.purge_tag_url.clone() {
            channels.push(InvalidationChannel::TagPurge {
                url
            });
        }
        if let Some(url) = settings.purge_path_url.clone() {
            channels.push(InvalidationChannel::PathPurge {
                url
            });
        }
        if let Some(url) = settings.hook_url.clone() {
            channels.push(InvalidationChannel::DownstreamHook {
                url
            });
        }

        Self {
            client,
            channels
        }
    }

    /// Configured channels, in attempt order.
    pub fn channels(&self) -> &[InvalidationChannel] {
        &self.channels
    }

    /// Attempts every configured channel once.
    ///
    /// Failures are logged and swallowed; the returned outcome never affects
    /// the sweep result.
    pub async fn notify(&self) -> NotifyOutcome {
        let mut outcome = NotifyOutcome::default();

        for channel in &self.channels {
            outcome.attempted += 1;
            match self.attempt(channel).await {
                Ok(()) => debug!("{} invalidation delivered", channel.describe()),
                Err(reason) => {
                    outcome.failed += 1;
                    warn!("{} invalidation failed: {reason}", channel.describe());
                }
            }
        }

        outcome
    }

    async fn attempt(&self, channel: &InvalidationChannel) -> Result<(), String> {
        let response = self
            .client
            .post(channel.url())
            .json(&channel.body())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }

        Ok(())
    }
}
