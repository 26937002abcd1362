// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Sweep orchestration over all active instances.
///
/// One sweep is one bounded unit of work: enumerate the non-banned
/// instances, probe each of them with bounded concurrency, persist the
/// results, then fire cache invalidation exactly once. Each instance is an
/// isolated unit returning an outcome value; a storage error or unreachable
/// host never aborts the remaining instances. Only a failure to enumerate
/// the instance set is fatal.
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    config::SweepConfig,
    error::Error,
    health::{record_failure, record_success},
    instance::{Instance, InstanceMetadata},
    notify::InvalidationNotifier,
    probe::{ProbeOutcome, build_client, probe},
    registry::{InstanceStore, StoreError},
    thumbnail::sanitize_thumbnail,
};

/// Machine-readable summary returned by [`SweepOrchestrator::sweep`].
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Human readable one-line summary.
    pub message: String,
    /// Instances that were processed (successfully or not).
    pub checked: usize,
    /// Instances whose metadata was refreshed.
    pub updated: usize,
    /// Instances that failed their health check.
    pub unreachable: usize,
    /// Instances newly banned during this sweep.
    pub newly_banned: usize,
    /// Instances whose persistence failed mid-update.
    pub storage_errors: usize
}

/// Outcome of one isolated instance check.
enum CheckOutcome {
    /// Probe succeeded and all writes were persisted.
    Updated,
    /// Probe failed and the failure was persisted.
    Failed {
        /// Whether this failure newly banned the instance.
        newly_banned: bool
    },
    /// A store write failed; the instance keeps its previous state.
    StorageFailed,
    /// The check was skipped because the sweep was cancelled.
    Skipped
}

/// Drives complete sweeps against a store of registered instances.
///
/// The orchestrator owns the sweep-wide resources: the shared HTTP client,
/// the notifier, the concurrency bound and the single-flight guard.
/// Overlapping sweeps are rejected rather than queued, since two concurrent
/// writers to the same record would race.
pub struct SweepOrchestrator {
    store:       Arc<dyn InstanceStore>,
    client:      reqwest::Client,
    notifier:    InvalidationNotifier,
    assets_dir:  PathBuf,
    concurrency: usize,
    running:     AtomicBool,
    cancelled:   Arc<AtomicBool>
}

impl SweepOrchestrator {
    /// Creates an orchestrator from already-built parts.
    ///
    /// # Parameters
    ///
    /// * `store` - Instance store the sweep reads from and writes to.
    /// * `client` - HTTP client carrying the probe timeout.
    /// * `notifier` - Invalidation channels fired after each sweep.
    /// * `assets_dir` - Root of locally mirrored thumbnail assets.
    /// * `concurrency` - Bound on concurrently probed instances.
    pub fn new(
        store: Arc<dyn InstanceStore>,
        client: reqwest::Client,
        notifier: InvalidationNotifier,
        assets_dir: PathBuf,
        concurrency: usize
    ) -> Self {
        Self {
            store,
            client,
            notifier,
            assets_dir,
            concurrency: concurrency.max(1),
            running: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false))
        }
    }

    /// Creates an orchestrator from a validated configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Service`] when the HTTP client cannot be built.
    pub fn from_config(
        store: Arc<dyn InstanceStore>,
        config: &SweepConfig
    ) -> Result<Self, Error> {
        let client = build_client(&config.probe)?;
        let notifier = InvalidationNotifier::new(client.clone(), &config.notify);

        Ok(Self::new(
            store,
            client,
            notifier,
            config.assets_dir.clone(),
            config.probe.concurrency
        ))
    }

    /// Requests cancellation of the current and any future sweep.
    ///
    /// Cancellation is cooperative and one-way: instances not yet dispatched
    /// are skipped, while per-instance updates already committed stay
    /// committed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Runs one complete sweep and returns its summary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a sweep is already in flight and
    /// [`Error::Service`] when the instance set cannot be enumerated. All
    /// per-instance failures degrade to counters in the report.
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::validation("sweep already in progress"));
        }

        let result = self.run().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self) -> Result<SweepReport, Error> {
        let instances = {
            let store = Arc::clone(&self.store);
            blocking_store(move || store.active_instances())
                .await
                .map_err(|e| Error::service(format!("failed to enumerate instances: {e}")))?
        };

        info!("sweeping {} active instances", instances.len());

        let pb = ProgressBar::new(instances.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {pos}/{len} {msg}")
                .map_err(|e| Error::service(format!("invalid progress template: {e}")))?
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<CheckOutcome> = JoinSet::new();

        for instance in instances {
            let store = Arc::clone(&self.store);
            let client = self.client.clone();
            let assets_dir = self.assets_dir.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&self.cancelled);
            let pb = pb.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return CheckOutcome::Skipped;
                };

                let outcome = if cancelled.load(Ordering::SeqCst) {
                    debug!("{instance} skipped: sweep cancelled");
                    CheckOutcome::Skipped
                } else {
                    pb.set_message(instance.host.clone());
                    check_instance(store, &client, &assets_dir, instance).await
                };

                pb.inc(1);
                outcome
            });
        }

        let mut report = SweepReport {
            message: String::new(),
            checked: 0,
            updated: 0,
            unreachable: 0,
            newly_banned: 0,
            storage_errors: 0
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(CheckOutcome::Updated) => {
                    report.checked += 1;
                    report.updated += 1;
                }
                Ok(CheckOutcome::Failed {
                    newly_banned
                }) => {
                    report.checked += 1;
                    report.unreachable += 1;
                    if newly_banned {
                        report.newly_banned += 1;
                    }
                }
                Ok(CheckOutcome::StorageFailed) => {
                    report.checked += 1;
                    report.storage_errors += 1;
                }
                Ok(CheckOutcome::Skipped) => {}
                Err(e) => {
                    warn!("instance check task failed: {e}");
                    report.checked += 1;
                    report.storage_errors += 1;
                }
            }
        }

        let notify_outcome = self.notifier.notify().await;
        if notify_outcome.failed > 0 {
            warn!(
                "{}/{} invalidation channels failed",
                notify_outcome.failed, notify_outcome.attempted
            );
        }

        report.message = format!(
            "sweep complete: {} updated, {} unreachable, {} newly banned, {} storage errors",
            report.updated, report.unreachable, report.newly_banned, report.storage_errors
        );
        pb.finish_with_message(report.message.clone());
        info!("{}", report.message);

        Ok(report)
    }
}

/// Runs one store operation on the blocking pool.
///
/// Store implementations are synchronous and may touch the filesystem, so
/// they must not run directly on the runtime's worker threads.
async fn blocking_store<T, F>(op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StoreError::backend(format!("store task failed: {e}")))?
}

/// Checks one instance and persists the result.
///
/// Isolated by design: every failure path collapses into a
/// [`CheckOutcome`] value instead of propagating, so a single instance can
/// never abort the batch.
async fn check_instance(
    store: Arc<dyn InstanceStore>,
    client: &reqwest::Client,
    assets_dir: &std::path::Path,
    mut instance: Instance
) -> CheckOutcome {
    match probe(client, &instance.host, instance.mode).await {
        ProbeOutcome::Online(snapshot) => {
            let metadata = InstanceMetadata {
                title: snapshot.title,
                description: snapshot.description,
                thumbnail: sanitize_thumbnail(&snapshot.thumbnail, assets_dir),
                user_count: snapshot.user_count,
                status_count: snapshot.status_count,
                registrations_open: snapshot.registrations_open,
                approval_required: snapshot.approval_required,
                cache: snapshot.raw
            };

            let written = {
                let store = Arc::clone(&store);
                let host = instance.host.clone();
                blocking_store(move || store.replace_metadata(&host, &metadata)).await
            };
            if let Err(e) = written {
                warn!("{instance}: metadata write failed: {e}");
                return CheckOutcome::StorageFailed;
            }

            record_success(&mut instance);
            let reset = {
                let store = Arc::clone(&store);
                let instance = instance.clone();
                blocking_store(move || store.update_health(&instance)).await
            };
            if let Err(e) = reset {
                warn!("{instance}: health reset failed: {e}");
                return CheckOutcome::StorageFailed;
            }

            CheckOutcome::Updated
        }
        ProbeOutcome::Unreachable {
            reason
        } => {
            debug!("{instance} unreachable: {reason}");

            let newly_banned = record_failure(&mut instance);
            let updated = {
                let store = Arc::clone(&store);
                let instance = instance.clone();
                blocking_store(move || store.update_health(&instance)).await
            };
            if let Err(e) = updated {
                warn!("{instance}: health update failed: {e}");
                return CheckOutcome::StorageFailed;
            }

            CheckOutcome::Failed {
                newly_banned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{SweepOrchestrator, SweepReport};
    use crate::{
        config::NotifySettings,
        health::BAN_REASON,
        instance::{Instance, InstanceMetadata},
        notify::InvalidationNotifier,
        registry::{InstanceStore, MemoryRegistry, StoreError},
    };

    fn instance(host: &str, mode: &str) -> Instance {
        serde_yaml::from_str(&format!("host: \"{host}\"\nmode: {mode}"))
            .expect("valid instance")
    }

    fn orchestrator(store: Arc<dyn InstanceStore>, concurrency: usize) -> SweepOrchestrator {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to build client");
        let notifier = InvalidationNotifier::new(client.clone(), &NotifySettings::default());

        SweepOrchestrator::new(
            store,
            client,
            notifier,
            std::env::temp_dir(),
            concurrency
        )
    }

    /// Serves one canned Mastodon instance payload over loopback HTTP and
    /// returns the `http://addr` host to register.
    async fn mastodon_server(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind listener");
        let addr = listener.local_addr().expect("failed to read local addr");

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buffer = [0u8; 4096];
                let _ = socket.read(&mut buffer).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}")
    }

    /// Serves `200 OK` to every request over loopback HTTP and counts the
    /// requests received.
    async fn counting_server() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind listener");
        let addr = listener.local_addr().expect("failed to read local addr");
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buffer = [0u8; 4096];
                let _ = socket.read(&mut buffer).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    /// Store wrapper that fails metadata writes for one poisoned host.
    struct PoisonedStore {
        inner:    MemoryRegistry,
        poisoned: String
    }

    impl InstanceStore for PoisonedStore {
        fn active_instances(&self) -> Result<Vec<Instance>, StoreError> {
            self.inner.active_instances()
        }

        fn update_health(&self, instance: &Instance) -> Result<(), StoreError> {
            self.inner.update_health(instance)
        }

        fn replace_metadata(
            &self,
            host: &str,
            metadata: &InstanceMetadata
        ) -> Result<(), StoreError> {
            if host == self.poisoned {
                return Err(StoreError::backend("disk full"));
            }
            self.inner.replace_metadata(host, metadata)
        }
    }

    /// Store whose enumeration is slow enough to overlap two sweeps.
    struct SlowStore;

    impl InstanceStore for SlowStore {
        fn active_instances(&self) -> Result<Vec<Instance>, StoreError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Vec::new())
        }

        fn update_health(&self, _instance: &Instance) -> Result<(), StoreError> {
            Ok(())
        }

        fn replace_metadata(
            &self,
            _host: &str,
            _metadata: &InstanceMetadata
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_registry_produces_empty_report() {
        let store = Arc::new(MemoryRegistry::new(Vec::new()));
        let report = orchestrator(store, 4).sweep().await.expect("sweep failed");

        assert_eq!(report.checked, 0);
        assert_eq!(report.updated, 0);
        assert!(report.message.contains("sweep complete"));
    }

    #[tokio::test]
    async fn end_to_end_sweep_matches_expected_transitions() {
        let body = r#"{"title":"A","description":"alpha","thumbnail":"https://cdn.example.org/a.png","stats":{"user_count":10,"status_count":100},"registrations":true}"#;
        let host_a = mastodon_server(body).await;

        let mut a = instance(&host_a, "mastodon");
        a.failures = 2;
        let b = instance("http://127.0.0.1:9", "mastodon");
        let mut c = instance("http://127.0.0.1:10", "misskey");
        c.failures = 4;
        let mut banned = instance("banned.example.org", "mastodon");
        banned.banned = true;
        banned.failures = 3;

        let store = Arc::new(MemoryRegistry::new(vec![
            a,
            b,
            c,
            banned,
        ]));
        let report = orchestrator(Arc::clone(&store) as Arc<dyn InstanceStore>, 4)
            .sweep()
            .await
            .expect("sweep failed");

        assert_eq!(report.checked, 3);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unreachable, 2);
        assert_eq!(report.newly_banned, 1);
        assert_eq!(report.storage_errors, 0);

        let entry_a = store.entry(&host_a).expect("instance A missing");
        assert_eq!(entry_a.instance.failures, 0);
        let metadata_a = entry_a.metadata.expect("metadata A missing");
        assert_eq!(metadata_a.title, "A");
        assert_eq!(metadata_a.user_count, 10);
        assert!(metadata_a.registrations_open);
        assert!(!metadata_a.cache.is_null());

        let entry_b = store.entry("http://127.0.0.1:9").expect("instance B missing");
        assert_eq!(entry_b.instance.failures, 1);
        assert!(!entry_b.instance.banned);

        let entry_c = store.entry("http://127.0.0.1:10").expect("instance C missing");
        assert!(entry_c.instance.banned);
        assert_eq!(entry_c.instance.ban_reason.as_deref(), Some(BAN_REASON));
        assert_eq!(entry_c.instance.failures, 4);

        let entry_banned = store.entry("banned.example.org").expect("banned instance missing");
        assert_eq!(entry_banned.instance.failures, 3);
        assert!(entry_banned.metadata.is_none());
    }

    #[tokio::test]
    async fn storage_failure_does_not_stop_later_instances() {
        let body = r#"{"title":"B"}"#;
        let host_b = mastodon_server(body).await;

        let b = instance(&host_b, "mastodon");
        let c = instance("http://127.0.0.1:9", "mastodon");

        let store = Arc::new(PoisonedStore {
            inner:    MemoryRegistry::new(vec![b, c]),
            poisoned: host_b.clone()
        });
        let report = orchestrator(Arc::clone(&store) as Arc<dyn InstanceStore>, 1)
            .sweep()
            .await
            .expect("sweep failed");

        assert_eq!(report.checked, 2);
        assert_eq!(report.storage_errors, 1);
        assert_eq!(report.unreachable, 1);

        // C was still processed after B's write failed.
        let entry_c = store.inner.entry("http://127.0.0.1:9").expect("instance C missing");
        assert_eq!(entry_c.instance.failures, 1);

        // B keeps its previous state.
        let entry_b = store.inner.entry(&host_b).expect("instance B missing");
        assert_eq!(entry_b.instance.failures, 0);
        assert!(entry_b.metadata.is_none());
    }

    #[tokio::test]
    async fn notification_fires_once_per_channel_per_sweep() {
        let (endpoint, hits) = counting_server().await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to build client");
        let notifier = InvalidationNotifier::new(client.clone(), &NotifySettings {
            purge_tag_url:  Some(format!("{endpoint}/purge-tag")),
            purge_path_url: Some(format!("{endpoint}/purge-path")),
            hook_url:       Some(format!("{endpoint}/hook"))
        });
        let store = Arc::new(MemoryRegistry::new(vec![
            instance("http://127.0.0.1:9", "mastodon"),
            instance("http://127.0.0.1:10", "mastodon"),
            instance("http://127.0.0.1:11", "misskey"),
        ]));
        let orchestrator = SweepOrchestrator::new(
            store,
            client,
            notifier,
            std::env::temp_dir(),
            2
        );

        let report = orchestrator.sweep().await.expect("sweep failed");
        assert_eq!(report.checked, 3);

        // Three channels configured, three instances swept: one request per
        // channel, not one per instance.
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failing_notifier_does_not_fail_the_sweep() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to build client");
        let notifier = InvalidationNotifier::new(client.clone(), &NotifySettings {
            purge_tag_url:  Some("http://127.0.0.1:9/purge".to_owned()),
            purge_path_url: None,
            hook_url:       Some("http://127.0.0.1:9/hook".to_owned())
        });
        let store = Arc::new(MemoryRegistry::new(Vec::new()));
        let orchestrator = SweepOrchestrator::new(
            store,
            client,
            notifier,
            std::env::temp_dir(),
            2
        );

        let report = orchestrator.sweep().await.expect("sweep failed");
        assert_eq!(report.checked, 0);
        assert_eq!(report.storage_errors, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_sweeps_are_rejected() {
        let orchestrator = Arc::new(orchestrator(Arc::new(SlowStore), 2));

        let first = Arc::clone(&orchestrator);
        let second = Arc::clone(&orchestrator);
        let (left, right) = tokio::join!(
            tokio::spawn(async move { first.sweep().await }),
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                second.sweep().await
            }
        );

        let left = left.expect("task panicked");
        assert!(left.is_ok());
        assert!(right.is_err(), "second sweep should be rejected while one is running");
    }

    #[tokio::test]
    async fn cancelled_orchestrator_skips_all_instances() {
        let store = Arc::new(MemoryRegistry::new(vec![instance(
            "http://127.0.0.1:9",
            "mastodon"
        )]));
        let orchestrator = orchestrator(Arc::clone(&store) as Arc<dyn InstanceStore>, 2);
        orchestrator.cancel();

        let report = orchestrator.sweep().await.expect("sweep failed");
        assert_eq!(report.checked, 0);

        let entry = store.entry("http://127.0.0.1:9").expect("instance missing");
        assert_eq!(entry.instance.failures, 0);
    }

    #[test]
    fn report_serializes_counts() {
        let report = SweepReport {
            message: "sweep complete".to_owned(),
            checked: 3,
            updated: 1,
            unreachable: 2,
            newly_banned: 1,
            storage_errors: 0
        };

        let json = serde_json::to_string(&report).expect("serialization failed");
        assert!(json.contains("\"checked\":3"));
        assert!(json.contains("\"newly_banned\":1"));
    }
}
