// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Narrow persistence seam consumed by the sweep engine.
///
/// The engine only ever needs three operations: enumerate the non-banned
/// instances, write back one instance's health fields, and replace one
/// instance's cached metadata. Everything else about persistence stays on
/// the other side of [`InstanceStore`].
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::instance::{Instance, InstanceMetadata, is_valid_host};

/// Failure taxonomy for store operations.
///
/// A missing record is signalled distinctly from a backend failure so the
/// orchestrator can tell data drift from infrastructure trouble.
#[derive(Debug, masterror::Error)]
pub enum StoreError {
    /// The addressed instance does not exist in the store.
    #[error("instance {host} not found")]
    NotFound {
        /// Host that was addressed.
        host: String
    },
    /// The backend failed to read or write.
    #[error("storage backend failure: {message}")]
    Backend {
        /// Human readable message describing the backend failure.
        message: String
    }
}

impl StoreError {
    /// Constructs a backend error from the provided displayable value.
    pub fn backend<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Backend {
            message: message.into()
        }
    }
}

/// Store interface consumed by the sweep orchestrator.
///
/// All operations are addressed by instance host. Implementations must
/// return [`StoreError::NotFound`] for unknown hosts rather than folding
/// that case into a backend failure.
pub trait InstanceStore: Send + Sync {
    /// Returns every instance with `banned = false`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the instance set cannot be
    /// enumerated. This is the only store failure that is fatal to a sweep.
    fn active_instances(&self) -> Result<Vec<Instance>, StoreError>;

    /// Writes back the health fields (`failures`, `banned`, `ban_reason`)
    /// of the given instance. All other fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown hosts and
    /// [`StoreError::Backend`] for read/write failures.
    fn update_health(&self, instance: &Instance) -> Result<(), StoreError>;

    /// Replaces the full metadata record of the addressed instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown hosts and
    /// [`StoreError::Backend`] for read/write failures.
    fn replace_metadata(&self, host: &str, metadata: &InstanceMetadata)
    -> Result<(), StoreError>;
}

/// One registry row: the identity record plus its cached metadata.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryEntry {
    /// Identity and health record.
    #[serde(flatten)]
    pub instance: Instance,

    /// Cached metadata from the last successful probe, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InstanceMetadata>
}

/// Root registry document persisted as a single YAML file.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RegistryDocument {
    /// All registered instances, banned ones included.
    #[serde(default)]
    pub instances: Vec<RegistryEntry>
}

/// Parses a registry document and checks its structural invariants.
///
/// Hosts must be bare lowercase domains and unique across the document.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] when the document is not valid YAML or
/// violates the host invariants.
pub fn parse_registry(raw: &str) -> Result<RegistryDocument, StoreError> {
    let document: RegistryDocument = serde_yaml::from_str(raw)
        .map_err(|e| StoreError::backend(format!("failed to parse registry: {e}")))?;

    let mut seen = HashSet::with_capacity(document.instances.len());
    for entry in &document.instances {
        let host = entry.instance.host.as_str();
        if !is_valid_host(host) {
            return Err(StoreError::backend(format!("invalid registry host '{host}'")));
        }
        if !seen.insert(host) {
            return Err(StoreError::backend(format!("duplicate registry host '{host}'")));
        }
    }

    Ok(document)
}

/// File-backed registry holding all instances in one YAML document.
///
/// Each mutation is a read-modify-write of the whole document, serialized
/// through a lock shared by every clone of the handle. The document is
/// replaced atomically (write to a sibling temp file, then rename), so
/// readers never observe a half-written registry. That is adequate for
/// directory-sized data sets and keeps every mutation visible in plain
/// text.
#[derive(Debug, Clone)]
pub struct YamlRegistry {
    path: PathBuf,
    guard: Arc<Mutex<()>>
}

impl YamlRegistry {
    /// Creates a registry handle for the document at `path`.
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>
    {
        Self {
            path: path.into(),
            guard: Arc::new(Mutex::new(()))
        }
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<RegistryDocument, StoreError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            StoreError::backend(format!(
                "failed to read registry at {}: {e}",
                self.path.display()
            ))
        })?;
        parse_registry(&raw)
    }

    fn write_document(&self, document: &RegistryDocument) -> Result<(), StoreError> {
        let raw = serde_yaml::to_string(document)
            .map_err(|e| StoreError::backend(format!("failed to serialize registry: {e}")))?;
        let staging = self.path.with_extension("yaml.tmp");
        fs::write(&staging, raw).map_err(|e| {
            StoreError::backend(format!(
                "failed to write registry at {}: {e}",
                staging.display()
            ))
        })?;
        fs::rename(&staging, &self.path).map_err(|e| {
            StoreError::backend(format!(
                "failed to replace registry at {}: {e}",
                self.path.display()
            ))
        })
    }

    fn with_entry<F>(&self, host: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RegistryEntry)
    {
        let _held = self
            .guard
            .lock()
            .map_err(|_| StoreError::backend("registry lock poisoned"))?;
        let mut document = self.read_document()?;
        let entry = document
            .instances
            .iter_mut()
            .find(|entry| entry.instance.host == host)
            .ok_or_else(|| StoreError::NotFound {
                host: host.to_owned()
            })?;

        mutate(entry);
        self.write_document(&document)
    }
}

impl InstanceStore for YamlRegistry {
    fn active_instances(&self) -> Result<Vec<Instance>, StoreError> {
        let document = self.read_document()?;
        let active: Vec<Instance> = document
            .instances
            .into_iter()
            .map(|entry| entry.instance)
            .filter(|instance| !instance.banned)
            .collect();
        debug!("registry returned {} active instances", active.len());
        Ok(active)
    }

    fn update_health(&self, instance: &Instance) -> Result<(), StoreError> {
        self.with_entry(&instance.host, |entry| {
            entry.instance.failures = instance.failures;
            entry.instance.banned = instance.banned;
            entry.instance.ban_reason = instance.ban_reason.clone();
        })
    }

    fn replace_metadata(
        &self,
        host: &str,
        metadata: &InstanceMetadata
    ) -> Result<(), StoreError> {
        self.with_entry(host, |entry| {
            entry.metadata = Some(metadata.clone());
        })
    }
}

/// In-memory registry used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<Vec<RegistryEntry>>
}

impl MemoryRegistry {
    /// Creates a registry pre-populated with the given instances.
    pub fn new(instances: Vec<Instance>) -> Self {
        let entries = instances
            .into_iter()
            .map(|instance| RegistryEntry {
                instance,
                metadata: None
            })
            .collect();
        Self {
            entries: RwLock::new(entries)
        }
    }

    /// Returns a copy of the entry for `host`, if present.
    pub fn entry(&self, host: &str) -> Option<RegistryEntry> {
        let entries = self.entries.read().ok()?;
        entries.iter().find(|entry| entry.instance.host == host).cloned()
    }
}

impl InstanceStore for MemoryRegistry {
    fn active_instances(&self) -> Result<Vec<Instance>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::backend("registry lock poisoned"))?;
        Ok(entries
            .iter()
            .map(|entry| entry.instance.clone())
            .filter(|instance| !instance.banned)
            .collect())
    }

    fn update_health(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::backend("registry lock poisoned"))?;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.instance.host == instance.host)
            .ok_or_else(|| StoreError::NotFound {
                host: instance.host.clone()
            })?;

        entry.instance.failures = instance.failures;
        entry.instance.banned = instance.banned;
        entry.instance.ban_reason = instance.ban_reason.clone();
        Ok(())
    }

    fn replace_metadata(
        &self,
        host: &str,
        metadata: &InstanceMetadata
    ) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::backend("registry lock poisoned"))?;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.instance.host == host)
            .ok_or_else(|| StoreError::NotFound {
                host: host.to_owned()
            })?;

        entry.metadata = Some(metadata.clone());
        Ok(())
    }
}
