//! Health-check and metadata-refresh engine for a directory of federated
//! social-network instances.
//!
//! The library sweeps a registry of independently-failing remote instances:
//! each sweep probes every non-banned instance's public API, normalizes the
//! dialect-specific payload into a canonical metadata record, repairs cached
//! thumbnail paths, tracks consecutive failures, bans instances after
//! repeated failures and fires best-effort cache invalidation once per
//! sweep. All public APIs are documented with invariants, error semantics,
//! and minimal examples to facilitate integration in automation tooling.

mod config;
mod error;
mod health;
mod instance;
mod notify;
mod probe;
mod registry;
mod sweep;
mod thumbnail;

pub use config::{NotifySettings, ProbeSettings, SweepConfig, load_config};
pub use error::{Error, io_error};
pub use health::{BAN_REASON, FAILURE_THRESHOLD, record_failure, record_success};
pub use instance::{ApiMode, Instance, InstanceMetadata, is_valid_host};
pub use notify::{InvalidationChannel, InvalidationNotifier, NotifyOutcome};
pub use probe::{InstanceSnapshot, ProbeOutcome, build_client, normalize_payload, probe};
pub use registry::{
    InstanceStore, MemoryRegistry, RegistryDocument, RegistryEntry, StoreError, YamlRegistry,
    parse_registry,
};
pub use sweep::{SweepOrchestrator, SweepReport};
pub use thumbnail::{PLACEHOLDER_THUMBNAIL, sanitize_thumbnail};
