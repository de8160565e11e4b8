//! Renders the Python harness that wraps user source for one execution.
//!
//! Policies are baked into the rendered script as JSON, so each child gets
//! its own immutable copy.

use std::path::PathBuf;

use minijinja::Environment;
use serde::Serialize;
use serde_json::Value;

use crate::policy::{FileSystemPolicy, NetworkPolicy};

use super::limits::ResourceLimits;

const HARNESS_TEMPLATE: &str = include_str!("../../templates/harness.py");

#[derive(Debug, Serialize)]
struct NetworkSection<'a> {
    enforce: bool,
    allowed_endpoints: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct FilesystemSection<'a> {
    enforce: bool,
    workspace_root: &'a std::path::Path,
    allow_writes: bool,
    restricted_dirs: &'a [PathBuf],
}

#[derive(Debug, Serialize)]
struct LimitsSection {
    max_memory: u64,
    max_cpu_seconds: u64,
}

/// Everything the harness reads from its embedded configuration.
#[derive(Debug, Serialize)]
pub(crate) struct HarnessConfig<'a> {
    network: NetworkSection<'a>,
    filesystem: FilesystemSection<'a>,
    limits: LimitsSection,
    servers_root: PathBuf,
    workspace: PathBuf,
}

impl<'a> HarnessConfig<'a> {
    pub(crate) fn new(
        network: Option<&'a NetworkPolicy>,
        filesystem: Option<&'a FileSystemPolicy>,
        fs_fallback: &'a FileSystemPolicy,
        limits: &ResourceLimits,
        servers_root: PathBuf,
    ) -> Self {
        let fs = filesystem.unwrap_or(fs_fallback);
        Self {
            network: NetworkSection {
                enforce: network.is_some(),
                allowed_endpoints: network
                    .map(|n| n.allowed_endpoints().collect())
                    .unwrap_or_default(),
            },
            filesystem: FilesystemSection {
                enforce: filesystem.is_some(),
                workspace_root: fs.workspace_root(),
                allow_writes: fs.allow_writes(),
                restricted_dirs: fs.restricted_dirs(),
            },
            limits: LimitsSection {
                max_memory: limits.max_memory,
                max_cpu_seconds: limits.max_cpu_seconds,
            },
            servers_root,
            workspace: fs.workspace_root().to_path_buf(),
        }
    }
}

/// Produce the script the child interpreter runs.
pub(crate) fn render(source: &str, config: &HarnessConfig<'_>) -> anyhow::Result<String> {
    let config_json = serde_json::to_string(config)?;

    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("harness.py", HARNESS_TEMPLATE)?;
    let rendered = env.get_template("harness.py")?.render(minijinja::context! {
        source => python_literal(source),
        config => python_literal(&config_json),
    })?;
    Ok(rendered)
}

/// JSON string syntax doubles as a Python string literal.
fn python_literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            timeout: Duration::from_secs(1),
            max_memory: 1024,
            max_cpu_seconds: 2,
        }
    }

    #[test]
    fn test_render_embeds_source_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystemPolicy::new(dir.path(), true);
        let net = NetworkPolicy::new(["api.example.com:443"]);
        let config = HarnessConfig::new(Some(&net), Some(&fs), &fs, &limits(), dir.path().join("servers"));

        let script = render("_result = \"a\\nb\"\nprint('{{ x }}')", &config).unwrap();
        assert!(script.contains(r#"_SOURCE = "_result = \"a\\nb\"\nprint('{{ x }}')""#));
        assert!(script.contains("api.example.com:443"));
        assert!(script.contains("_main()"));
    }

    #[test]
    fn test_disabled_policies() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystemPolicy::new(dir.path(), false);
        let config = HarnessConfig::new(None, None, &fs, &limits(), dir.path().join("servers"));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["network"]["enforce"], false);
        assert_eq!(json["filesystem"]["enforce"], false);
        assert_eq!(json["limits"]["max_cpu_seconds"], 2);
    }
}
