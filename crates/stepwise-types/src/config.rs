//! Global configuration types for stepwise.
//!
//! `GlobalConfig` represents the top-level `config.toml` in the data
//! directory: where workflow documents live, runtime limits for the trigger
//! service, and the HTTP endpoints that action subjects are dispatched to.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a stepwise deployment.
///
/// Loaded from `~/.stepwise/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Directory scanned for `*.yaml` / `*.yml` workflow documents.
    /// Relative paths are resolved against the data directory.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,

    /// Capacity of the in-process activation bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Per-action dispatch timeout in seconds. `0` disables the timeout.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Upper bound on runs executing at the same time.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// HTTP endpoints keyed by action subject.
    #[serde(default)]
    pub subjects: BTreeMap<String, SubjectEndpoint>,
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("workflows")
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_runs() -> usize {
    16
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
            event_bus_capacity: default_event_bus_capacity(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
            log_format: LogFormat::default(),
            subjects: BTreeMap::new(),
        }
    }
}

/// Log line format for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Where actions for one subject are sent.
///
/// An action `Subject.predicate` is POSTed to `{base_url}/{predicate}` with
/// the resolved args as the JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectEndpoint {
    pub base_url: String,
    /// Extra request headers (e.g. authorization).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}
