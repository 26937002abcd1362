//! Configuration document types for the sweep engine.
//!
//! The types in this module mirror the structure of the YAML documents
//! consumed by the CLI. They intentionally keep optional values flexible to
//! allow operator overrides, and provide validation that keeps the injected
//! configuration within safe bounds. Configuration is loaded once and passed
//! into the orchestrator at construction; nothing deeper reads the process
//! environment.

use std::{fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// Default directory containing locally mirrored thumbnail assets.
const DEFAULT_ASSETS_DIR: &str = "public";
/// Default bound on a single probe request, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default number of instances probed concurrently.
const DEFAULT_CONCURRENCY: usize = 8;
/// Upper bound accepted for probe timeouts, in seconds.
const MAX_TIMEOUT_SECS: u64 = 300;
/// Upper bound accepted for probe concurrency.
const MAX_CONCURRENCY: usize = 64;

/// Root configuration document for one sweep deployment.
///
/// # Examples
///
/// ```
/// use fedidir::SweepConfig;
///
/// let yaml = r"
/// registry: instances.yaml
/// probe:
///   timeout_secs: 5
///   concurrency: 4
/// ";
/// let config: SweepConfig = serde_yaml::from_str(yaml,).expect("valid configuration",);
/// assert_eq!(config.probe.concurrency, 4);
/// ```
#[derive(Debug, Deserialize, Serialize, Clone,)]
pub struct SweepConfig
{
    /// Path of the YAML registry document holding all instances.
    pub registry: PathBuf,

    /// Directory containing locally mirrored thumbnail assets.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Probe tuning knobs.
    #[serde(default)]
    pub probe: ProbeSettings,

    /// Invalidation channel endpoints.
    #[serde(default)]
    pub notify: NotifySettings,
}

/// Tuning knobs for the dialect probe and the sweep fan-out.
#[derive(Debug, Deserialize, Serialize, Clone,)]
pub struct ProbeSettings
{
    /// Bound on a single probe request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of instances probed concurrently within one sweep.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// User agent presented to remote instances.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProbeSettings
{
    fn default() -> Self
    {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency:  DEFAULT_CONCURRENCY,
            user_agent:   default_user_agent(),
        }
    }
}

/// Endpoints notified after a completed sweep.
///
/// Every configured channel is attempted independently; unset channels are
/// skipped. All channels failing never fails the sweep.
#[derive(Debug, Deserialize, Serialize, Clone, Default,)]
pub struct NotifySettings
{
    /// Tag-based cache purge endpoint.
    #[serde(default)]
    pub purge_tag_url: Option<String,>,

    /// Path-based cache purge endpoint.
    #[serde(default)]
    pub purge_path_url: Option<String,>,

    /// Direct refresh signal for dependent services.
    #[serde(default)]
    pub hook_url: Option<String,>,
}

impl SweepConfig
{
    /// Checks the document against the engine's operational bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a knob is zero, exceeds its upper
    /// bound, or a notification endpoint is not an absolute HTTP URL.
    pub fn validate(&self,) -> Result<(), Error,>
    {
        if self.registry.as_os_str().is_empty() {
            return Err(Error::validation("registry path must not be empty",),);
        }

        if self.probe.timeout_secs == 0 || self.probe.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::validation(format!(
                "probe timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds"
            ),),);
        }

        if self.probe.concurrency == 0 || self.probe.concurrency > MAX_CONCURRENCY {
            return Err(Error::validation(format!(
                "probe concurrency must be between 1 and {MAX_CONCURRENCY}"
            ),),);
        }

        if self.probe.user_agent.trim().is_empty() {
            return Err(Error::validation("probe user agent must not be empty",),);
        }

        for (name, url,) in [
            ("purge_tag_url", &self.notify.purge_tag_url,),
            ("purge_path_url", &self.notify.purge_path_url,),
            ("hook_url", &self.notify.hook_url,),
        ] {
            if let Some(value,) = url
                && !(value.starts_with("http://",) || value.starts_with("https://",))
            {
                return Err(Error::validation(format!(
                    "{name} must be an absolute http(s) URL"
                ),),);
            }
        }

        Ok((),)
    }
}

/// Loads and validates a sweep configuration document from disk.
///
/// # Parameters
///
/// * `path` - Location of the YAML configuration file.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file cannot be read, [`Error::Parse`] when
/// it is not valid YAML, and [`Error::Validation`] when it violates the
/// operational bounds.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
///
/// use fedidir::load_config;
///
/// # fn example() -> Result<(), fedidir::Error> {
/// let config = load_config(Path::new("sweep.yaml",),)?;
/// println!("registry: {}", config.registry.display());
/// # Ok(())
/// # }
/// ```
pub fn load_config(path: &Path,) -> Result<SweepConfig, Error,>
{
    let raw = fs::read_to_string(path,).map_err(|source| error::io_error(path, source,),)?;
    let config: SweepConfig = serde_yaml::from_str(&raw,)?;
    config.validate()?;
    Ok(config,)
}

fn default_assets_dir() -> PathBuf
{
    PathBuf::from(DEFAULT_ASSETS_DIR,)
}

const fn default_timeout_secs() -> u64
{
    DEFAULT_TIMEOUT_SECS
}

const fn default_concurrency() -> usize
{
    DEFAULT_CONCURRENCY
}

fn default_user_agent() -> String
{
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned()
}
