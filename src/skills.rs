//! Reusable helper packages under `<workspace>/skills`.
//!
//! A directory is a skill when it carries a `SKILL.md` with `Description`
//! and `Usage` sections:
//!
//! ```text
//! # Report builder
//!
//! ## Description
//! Formats issue lists as markdown tables.
//!
//! ## Usage
//! from skills.report import render
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const SKILL_DOC: &str = "SKILL.md";
pub const REQUIRED_SECTIONS: &[&str] = &["Description", "Usage"];

/// Title and `##` sections of a skill document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkillDoc {
    pub title: Option<String>,
    pub sections: BTreeMap<String, String>,
}

/// A discovered skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    /// Directory name, which is also the import name under `skills.`.
    pub name: String,
    pub path: PathBuf,
    pub title: String,
    pub description: String,
    pub usage: String,
    /// Every section, including the required ones.
    pub sections: BTreeMap<String, String>,
}

/// A skill directory that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillIssue {
    pub name: String,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkillDiscovery {
    pub skills: Vec<Skill>,
    pub issues: Vec<SkillIssue>,
}

impl SkillDiscovery {
    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }
}

/// Parse a skill document line by line.
///
/// The title is the first `# ` heading. A section runs from its `## Name`
/// header to the next `## ` header or the end of the file.
pub fn parse_skill_doc(text: &str) -> SkillDoc {
    let mut doc = SkillDoc::default();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(name) = line.strip_prefix("## ") {
            if let Some((name, body)) = current.take() {
                doc.sections.insert(name, body.join("\n").trim().to_string());
            }
            current = Some((name.trim().to_string(), Vec::new()));
        } else if current.is_none() && doc.title.is_none() && line.starts_with("# ") {
            doc.title = Some(line[2..].trim().to_string());
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((name, body)) = current {
        doc.sections.insert(name, body.join("\n").trim().to_string());
    }
    doc
}

/// Find skills under `<workspace>/skills`. A missing directory yields an
/// empty discovery.
pub fn discover_skills(workspace: &Path) -> SkillDiscovery {
    let root = workspace.join("skills");
    let mut discovery = SkillDiscovery::default();

    let Ok(entries) = std::fs::read_dir(&root) else {
        return discovery;
    };

    let mut dirs: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .filter(|(name, _)| !name.starts_with('_') && !name.starts_with('.'))
        .collect();
    dirs.sort();

    for (name, path) in dirs {
        let doc_path = path.join(SKILL_DOC);
        let text = match std::fs::read_to_string(&doc_path) {
            Ok(text) => text,
            Err(_) => continue,
        };
        match skill_from_doc(&name, &path, parse_skill_doc(&text)) {
            Ok(skill) => discovery.skills.push(skill),
            Err(message) => {
                tracing::warn!(skill = %name, %message, "skipping skill");
                discovery.issues.push(SkillIssue {
                    name,
                    path,
                    message,
                });
            }
        }
    }

    tracing::debug!(
        skills = discovery.skills.len(),
        issues = discovery.issues.len(),
        "skills discovered"
    );
    discovery
}

fn skill_from_doc(name: &str, path: &Path, doc: SkillDoc) -> Result<Skill, String> {
    let missing: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|section| doc.sections.get(*section).map_or(true, |body| body.is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(format!("{} is missing required sections: {}", SKILL_DOC, missing.join(", ")));
    }

    let section = |name: &str| doc.sections.get(name).cloned().unwrap_or_default();
    Ok(Skill {
        name: name.to_string(),
        path: path.to_path_buf(),
        title: doc.title.clone().unwrap_or_else(|| name.to_string()),
        description: section("Description"),
        usage: section("Usage"),
        sections: doc.sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Report builder\n\nIntro text.\n\n## Description\nFormats issues.\n\n## Usage\nfrom skills.report import render\n\n## Notes\n# not a title\n";

    #[test]
    fn test_parse_skill_doc() {
        let doc = parse_skill_doc(DOC);
        assert_eq!(doc.title.as_deref(), Some("Report builder"));
        assert_eq!(doc.sections["Description"], "Formats issues.");
        assert_eq!(doc.sections["Usage"], "from skills.report import render");
        assert_eq!(doc.sections["Notes"], "# not a title");
    }

    #[test]
    fn test_discover_skills() {
        let dir = tempfile::tempdir().unwrap();
        let skills = dir.path().join("skills");
        std::fs::create_dir_all(skills.join("report")).unwrap();
        std::fs::write(skills.join("report/SKILL.md"), DOC).unwrap();
        std::fs::create_dir_all(skills.join("broken")).unwrap();
        std::fs::write(skills.join("broken/SKILL.md"), "# Broken\n## Description\nx\n").unwrap();
        std::fs::create_dir_all(skills.join("undocumented")).unwrap();

        let discovery = discover_skills(dir.path());
        assert_eq!(discovery.skills.len(), 1);
        let report = discovery.get("report").unwrap();
        assert_eq!(report.title, "Report builder");
        assert_eq!(report.description, "Formats issues.");

        assert_eq!(discovery.issues.len(), 1);
        assert_eq!(discovery.issues[0].name, "broken");
        assert!(discovery.issues[0].message.contains("Usage"));
    }

    #[test]
    fn test_missing_skills_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(discover_skills(dir.path()), SkillDiscovery::default());
    }
}
