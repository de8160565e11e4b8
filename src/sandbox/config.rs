//! Sandbox configuration with builder pattern.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the code executor.
///
/// Every field has a default, so a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget per execution.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Address-space limit in bytes.
    pub max_memory: u64,
    /// CPU-time limit in seconds.
    pub max_cpu_seconds: u64,
    /// Interpreter executable, resolved through `PATH` when relative.
    pub python_path: PathBuf,
    /// Directory all sandboxed filesystem activity is confined to.
    pub workspace_root: PathBuf,
    /// Generated tool package root. Defaults to `<workspace_root>/servers`.
    pub servers_root: Option<PathBuf>,
    pub enforce_network_policy: bool,
    pub enforce_filesystem_policy: bool,
    pub allow_writes: bool,
    /// `host`, `host:port` or wildcard entries.
    pub allowed_endpoints: BTreeSet<String>,
    /// Cap applied separately to captured stdout and stderr.
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_memory: 512 * 1024 * 1024, // 512MB
            max_cpu_seconds: 30,
            python_path: PathBuf::from("python3"),
            workspace_root: PathBuf::from("workspace"),
            servers_root: None,
            enforce_network_policy: true,
            enforce_filesystem_policy: true,
            allow_writes: true,
            allowed_endpoints: BTreeSet::new(),
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Where generated tool packages live.
    pub fn servers_root(&self) -> PathBuf {
        self.servers_root
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("servers"))
    }

    /// Parse a JSON document, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Set the wall-clock timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the address-space limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.config.max_memory = bytes;
        self
    }

    /// Set the CPU-time limit in seconds.
    pub fn max_cpu_seconds(mut self, seconds: u64) -> Self {
        self.config.max_cpu_seconds = seconds;
        self
    }

    /// Set the interpreter executable.
    pub fn python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.python_path = path.into();
        self
    }

    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    pub fn servers_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.servers_root = Some(path.into());
        self
    }

    pub fn enforce_network_policy(mut self, enforce: bool) -> Self {
        self.config.enforce_network_policy = enforce;
        self
    }

    pub fn enforce_filesystem_policy(mut self, enforce: bool) -> Self {
        self.config.enforce_filesystem_policy = enforce;
        self
    }

    pub fn allow_writes(mut self, allow: bool) -> Self {
        self.config.allow_writes = allow;
        self
    }

    /// Add an endpoint to the network allow-list.
    pub fn allow_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.allowed_endpoints.insert(endpoint.into());
        self
    }

    /// Cap captured stdout and stderr.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Resolve `path` against the current directory without touching the
/// filesystem.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Durations as `"30s"` / `"500ms"` strings.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if d.subsec_millis() == 0 {
            s.serialize_str(&format!("{}s", d.as_secs()))
        } else {
            s.serialize_str(&format!("{}ms", d.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(v) = s.strip_suffix("ms") {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }
        if let Some(v) = s.strip_suffix('s') {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string());
        }
        Err(format!("unknown duration format: '{s}' (use '30s' or '500ms')"))
    }
}
