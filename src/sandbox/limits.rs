//! Resource limits for sandboxed child processes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::SandboxConfig;

/// Limits applied to one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub timeout: Duration,
    /// Address-space limit in bytes.
    pub max_memory: u64,
    pub max_cpu_seconds: u64,
}

impl ResourceLimits {
    /// The configured defaults, with any per-call overrides applied.
    pub fn resolve(config: &SandboxConfig, overrides: Option<ExecutionLimits>) -> Self {
        let overrides = overrides.unwrap_or_default();
        Self {
            timeout: overrides.timeout.unwrap_or(config.timeout),
            max_memory: overrides.max_memory.unwrap_or(config.max_memory),
            max_cpu_seconds: overrides.max_cpu_seconds.unwrap_or(config.max_cpu_seconds),
        }
    }

    /// Apply the limits to the calling process.
    ///
    /// Runs in the forked child before `exec`, so it only makes
    /// async-signal-safe calls. Individual `setrlimit` failures are ignored:
    /// a platform without a given limit still runs the code.
    #[cfg(unix)]
    pub(crate) fn apply_to_current_process(&self) {
        fn rlimit(value: u64) -> libc::rlimit {
            libc::rlimit {
                rlim_cur: value as libc::rlim_t,
                rlim_max: value as libc::rlim_t,
            }
        }

        unsafe {
            if self.max_cpu_seconds > 0 {
                libc::setrlimit(libc::RLIMIT_CPU, &rlimit(self.max_cpu_seconds));
            }
            #[cfg(any(target_os = "linux", target_os = "android"))]
            if self.max_memory > 0 {
                libc::setrlimit(libc::RLIMIT_AS, &rlimit(self.max_memory));
            }
            libc::setrlimit(libc::RLIMIT_CORE, &rlimit(0));
        }
    }
}

/// Per-call overrides of the configured limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub timeout: Option<Duration>,
    pub max_memory: Option<u64>,
    pub max_cpu_seconds: Option<u64>,
}

impl ExecutionLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    pub fn max_cpu_seconds(mut self, seconds: u64) -> Self {
        self.max_cpu_seconds = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_come_from_config() {
        let config = SandboxConfig::default();
        let limits = ResourceLimits::resolve(&config, None);
        assert_eq!(limits.timeout, config.timeout);
        assert_eq!(limits.max_memory, config.max_memory);
        assert_eq!(limits.max_cpu_seconds, config.max_cpu_seconds);
    }

    #[test]
    fn test_overrides_win() {
        let config = SandboxConfig::default();
        let limits = ResourceLimits::resolve(
            &config,
            Some(ExecutionLimits::new().timeout(Duration::from_secs(2)).max_cpu_seconds(1)),
        );
        assert_eq!(limits.timeout, Duration::from_secs(2));
        assert_eq!(limits.max_cpu_seconds, 1);
        assert_eq!(limits.max_memory, config.max_memory);
    }
}
