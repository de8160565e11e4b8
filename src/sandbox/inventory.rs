//! Filesystem view of the generated tool tree.
//!
//! Nothing here imports generated code; the tree is walked as plain files so
//! diagnostics work even when a module would fail to import.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::tools::generator::python_identifier;

/// One generated server package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub path: PathBuf,
    pub tools: Vec<String>,
    pub has_init: bool,
}

/// Servers and tools found under a servers root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInventory {
    pub servers_root: PathBuf,
    pub exists: bool,
    pub servers: BTreeMap<String, ServerInfo>,
    /// Problems with the tree itself: missing root, empty servers, missing
    /// package inits.
    pub issues: Vec<String>,
}

/// Answer to "does `server.tool` exist?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVerification {
    pub server: String,
    pub tool: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub issues: Vec<String>,
    /// Near matches when the server or tool was not found.
    pub suggestions: Vec<String>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

impl ToolInventory {
    /// Walk `servers_root`. Never fails; unreadable entries become issues.
    pub fn scan(servers_root: impl Into<PathBuf>) -> Self {
        let servers_root = servers_root.into();
        let mut inventory = Self {
            exists: servers_root.is_dir(),
            servers_root,
            servers: BTreeMap::new(),
            issues: Vec::new(),
        };

        if !inventory.exists {
            inventory.issues.push(format!(
                "servers directory {} does not exist; no tools have been generated",
                inventory.servers_root.display()
            ));
            return inventory;
        }

        let entries = match std::fs::read_dir(&inventory.servers_root) {
            Ok(entries) => entries,
            Err(e) => {
                inventory.issues.push(format!(
                    "cannot read {}: {}",
                    inventory.servers_root.display(),
                    e
                ));
                return inventory;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) || !path.is_dir() {
                continue;
            }
            let server = scan_server(name, path);
            if !server.has_init {
                inventory
                    .issues
                    .push(format!("server '{}' has no __init__.py", server.name));
            }
            if server.tools.is_empty() {
                inventory
                    .issues
                    .push(format!("server '{}' contains no tools", server.name));
            }
            inventory.servers.insert(server.name.clone(), server);
        }

        inventory
    }

    pub fn total_tools(&self) -> usize {
        self.servers.values().map(|s| s.tools.len()).sum()
    }

    /// Check one tool, with suggestions for near misses.
    pub fn verify(&self, server: &str, tool: &str) -> ToolVerification {
        let mut verification = ToolVerification {
            server: server.to_string(),
            tool: tool.to_string(),
            exists: false,
            path: None,
            issues: Vec::new(),
            suggestions: Vec::new(),
        };

        if !self.exists {
            verification.issues.extend(self.issues.iter().cloned());
            return verification;
        }

        let Some(info) = lookup(&self.servers, server) else {
            verification
                .issues
                .push(format!("server '{}' not found", server));
            verification.suggestions = suggest(server, self.servers.keys().map(String::as_str));
            return verification;
        };

        if !info.has_init {
            verification
                .issues
                .push(format!("server '{}' has no __init__.py", info.name));
        }

        let module = [tool.to_string(), python_identifier(tool)]
            .into_iter()
            .find(|candidate| info.tools.iter().any(|t| t == candidate));
        match module {
            Some(module) => {
                verification.exists = true;
                verification.path = Some(info.path.join(format!("{}.py", module)));
            }
            None => {
                verification.issues.push(format!(
                    "tool '{}' not found in server '{}'",
                    tool, info.name
                ));
                verification.suggestions = suggest(tool, info.tools.iter().map(String::as_str))
                    .into_iter()
                    .map(|t| format!("{}.{}", info.name, t))
                    .collect();
            }
        }
        verification
    }
}

fn lookup<'a>(servers: &'a BTreeMap<String, ServerInfo>, name: &str) -> Option<&'a ServerInfo> {
    servers
        .get(name)
        .or_else(|| servers.get(&python_identifier(name)))
}

fn scan_server(name: String, path: PathBuf) -> ServerInfo {
    let has_init = path.join("__init__.py").is_file();
    let mut tools: Vec<String> = std::fs::read_dir(&path)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|entry| {
                    let file = entry.file_name().to_string_lossy().into_owned();
                    let stem = file.strip_suffix(".py")?;
                    (!is_hidden(stem) && entry.path().is_file()).then(|| stem.to_string())
                })
                .collect()
        })
        .unwrap_or_default();
    tools.sort();
    ServerInfo {
        name,
        path,
        tools,
        has_init,
    }
}

/// Candidates within edit distance 2, or sharing a case-insensitive
/// substring with `wanted`.
fn suggest<'a>(wanted: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<String> {
    let wanted_lower = wanted.to_lowercase();
    let mut scored: Vec<(usize, &str)> = candidates
        .filter_map(|candidate| {
            let lower = candidate.to_lowercase();
            let distance = levenshtein(&wanted_lower, &lower);
            let related = !wanted_lower.is_empty()
                && (lower.contains(&wanted_lower) || wanted_lower.contains(&lower));
            (distance <= 2 || related).then_some((distance, candidate))
        })
        .collect();
    scored.sort();
    scored.into_iter().take(5).map(|(_, c)| c.to_string()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("github/__pycache__")).unwrap();
        std::fs::write(root.join("__init__.py"), "").unwrap();
        std::fs::write(root.join("_bridge.py"), "x = 1").unwrap();
        std::fs::write(root.join("github/__init__.py"), "x = 1").unwrap();
        std::fs::write(root.join("github/list_issues.py"), "x = 1").unwrap();
        std::fs::write(root.join("github/create_issue.py"), "x = 1").unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        dir
    }

    #[test]
    fn test_scan() {
        let dir = tree();
        let inventory = ToolInventory::scan(dir.path());
        assert!(inventory.exists);
        assert_eq!(inventory.servers.len(), 2);
        assert_eq!(inventory.servers["github"].tools, vec!["create_issue", "list_issues"]);
        assert_eq!(inventory.total_tools(), 2);
        assert!(inventory.issues.iter().any(|i| i.contains("'empty' has no __init__.py")));
        assert!(inventory.issues.iter().any(|i| i.contains("'empty' contains no tools")));
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = ToolInventory::scan(dir.path().join("servers"));
        assert!(!inventory.exists);
        let verification = inventory.verify("github", "list_issues");
        assert!(!verification.exists);
        assert!(verification.issues[0].contains("does not exist"));
    }

    #[test]
    fn test_verify_and_suggestions() {
        let dir = tree();
        let inventory = ToolInventory::scan(dir.path());

        let found = inventory.verify("github", "list-issues");
        assert!(found.exists);
        assert_eq!(found.path, Some(dir.path().join("github/list_issues.py")));

        let typo = inventory.verify("github", "list_isues");
        assert!(!typo.exists);
        assert_eq!(typo.suggestions, vec!["github.list_issues"]);

        let server = inventory.verify("GitHub", "list_issues");
        assert!(!server.exists);
        assert_eq!(server.suggestions, vec!["github"]);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
