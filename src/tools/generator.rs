//! Turns discovered tools into importable Python wrapper modules.
//!
//! Layout under the servers root:
//!
//! ```text
//! servers/
//!   __init__.py
//!   _bridge.py            host bridge client
//!   <provider>/
//!     __init__.py         re-exports every wrapper
//!     <tool>.py           async def <tool>(...)
//! ```
//!
//! A provider's directory is regenerated wholesale. Every emitted file is
//! re-read afterwards; a missing or empty file is recorded against its tool
//! without aborting the others.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::Environment;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{ProviderError, Tool, ToolProvider};
use crate::error::ErrorKind;

const TOOL_TEMPLATE: &str = "tool_wrapper.py";
const INIT_TEMPLATE: &str = "package_init.py";
const SERVERS_INIT: &str = include_str!("../../templates/servers_init.py");
const BRIDGE_MODULE: &str = include_str!("../../templates/bridge.py");

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield", "match", "case", "type",
];

/// Names the wrapper template itself uses.
const RESERVED_NAMES: &[&str] = &["_arguments", "_bridge", "Any", "Optional"];

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("malformed input schema for tool '{tool}': {reason}")]
    MalformedSchema { tool: String, reason: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GenerationError {
    /// Short name recorded in per-tool failure reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            GenerationError::MalformedSchema { .. } => "MalformedSchema",
            GenerationError::Template(_) => "TemplateError",
            GenerationError::Io { .. } => ErrorKind::GenerationVerificationError.as_str(),
            GenerationError::Provider(_) => ErrorKind::ProviderError.as_str(),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> GenerationError + '_ {
    move |source| GenerationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of re-reading emitted files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub all_exist: bool,
    pub missing: Vec<PathBuf>,
    pub empty: Vec<PathBuf>,
}

/// A tool that could not be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationFailure {
    pub tool: String,
    pub error_type: String,
    pub message: String,
}

/// Per-provider outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderReport {
    /// Package directory name under the servers root.
    pub package: String,
    pub discovered: usize,
    pub tool_count: usize,
    /// Tool names whose wrappers were written and verified.
    pub tools: Vec<String>,
    pub paths: Vec<PathBuf>,
    pub init_path: PathBuf,
    pub verification: Verification,
    pub errors: Vec<GenerationFailure>,
}

/// Startup report across providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub servers_root: PathBuf,
    pub providers: BTreeMap<String, ProviderReport>,
}

impl GenerationReport {
    pub fn total_tools(&self) -> usize {
        self.providers.values().map(|p| p.tool_count).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.providers.values().any(|p| !p.errors.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
struct Param {
    name: String,
    /// Python string literal of the wire name.
    key: String,
    ident: String,
    py_type: &'static str,
    required: bool,
    description: String,
}

#[derive(Debug, Clone, Serialize)]
struct InitEntry {
    module: String,
    function: String,
    literal: String,
}

/// Emits wrapper modules for tools.
pub struct ToolGenerator {
    servers_root: PathBuf,
    templates: Environment<'static>,
}

impl ToolGenerator {
    pub fn new(servers_root: impl Into<PathBuf>) -> Result<Self, GenerationError> {
        let mut templates = Environment::new();
        templates.set_trim_blocks(true);
        templates.set_lstrip_blocks(true);
        templates.add_template(TOOL_TEMPLATE, include_str!("../../templates/tool_wrapper.py.j2"))?;
        templates.add_template(INIT_TEMPLATE, include_str!("../../templates/package_init.py.j2"))?;

        Ok(Self {
            servers_root: servers_root.into(),
            templates,
        })
    }

    pub fn servers_root(&self) -> &Path {
        &self.servers_root
    }

    /// Write the root package and the bridge client module. Idempotent.
    pub fn prepare(&self) -> Result<(), GenerationError> {
        std::fs::create_dir_all(&self.servers_root).map_err(io_error(&self.servers_root))?;
        for (name, contents) in [("__init__.py", SERVERS_INIT), ("_bridge.py", BRIDGE_MODULE)] {
            let path = self.servers_root.join(name);
            std::fs::write(&path, contents).map_err(io_error(&path))?;
        }
        Ok(())
    }

    /// Discover a provider's tools and generate wrappers for them.
    pub async fn generate(&self, provider: &dyn ToolProvider) -> Result<ProviderReport, GenerationError> {
        let tools = provider.discover_tools().await?;
        self.generate_tools(provider.provider_name(), &tools)
    }

    /// Generate wrappers for several providers.
    pub async fn generate_all(
        &self,
        providers: &[Arc<dyn ToolProvider>],
    ) -> Result<GenerationReport, GenerationError> {
        let mut report = GenerationReport {
            servers_root: self.servers_root.clone(),
            providers: BTreeMap::new(),
        };
        for provider in providers {
            let provider_report = self.generate(provider.as_ref()).await?;
            report
                .providers
                .insert(provider.provider_name().to_string(), provider_report);
        }
        Ok(report)
    }

    /// Generate wrappers for an explicit tool list.
    pub fn generate_tools(&self, provider_name: &str, tools: &[Tool]) -> Result<ProviderReport, GenerationError> {
        self.prepare()?;

        let package = python_identifier(provider_name);
        let provider_dir = self.servers_root.join(&package);
        if provider_dir.exists() {
            std::fs::remove_dir_all(&provider_dir).map_err(io_error(&provider_dir))?;
        }
        std::fs::create_dir_all(&provider_dir).map_err(io_error(&provider_dir))?;

        let mut errors = Vec::new();
        let mut written: Vec<(String, String, PathBuf)> = Vec::new();
        let mut modules = HashSet::new();

        for tool in tools {
            let module = unique_name(python_identifier(&tool.name), &mut modules);
            let path = provider_dir.join(format!("{}.py", module));

            let outcome = self
                .render_tool(provider_name, &package, &module, tool)
                .and_then(|source| std::fs::write(&path, source).map_err(io_error(&path)));
            match outcome {
                Ok(()) => written.push((tool.name.clone(), module, path)),
                Err(e) => {
                    tracing::warn!(provider = provider_name, tool = %tool.name, error = %e, "tool wrapper generation failed");
                    errors.push(GenerationFailure {
                        tool: tool.name.clone(),
                        error_type: e.kind_name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let init_entries: Vec<InitEntry> = written
            .iter()
            .map(|(_, module, _)| InitEntry {
                module: module.clone(),
                function: module.clone(),
                literal: python_string(module),
            })
            .collect();
        let init_path = provider_dir.join("__init__.py");
        let init_source = self
            .templates
            .get_template(INIT_TEMPLATE)?
            .render(minijinja::context! { provider => package, tools => init_entries })?;
        std::fs::write(&init_path, init_source + "\n").map_err(io_error(&init_path))?;

        // Verify what actually landed on disk.
        let mut verification = Verification::default();
        let mut tools_ok = Vec::new();
        let mut paths = Vec::new();
        for (tool, _, path) in written {
            match check_file(&path) {
                FileState::Ok => {
                    tools_ok.push(tool);
                    paths.push(path);
                }
                state => {
                    errors.push(GenerationFailure {
                        tool,
                        error_type: ErrorKind::GenerationVerificationError.to_string(),
                        message: format!("{} after generation: {}", state.describe(), path.display()),
                    });
                    state.record(&mut verification, path);
                }
            }
        }
        match check_file(&init_path) {
            FileState::Ok => {}
            state => state.record(&mut verification, init_path.clone()),
        }
        verification.all_exist = verification.missing.is_empty() && verification.empty.is_empty();

        tracing::info!(
            provider = provider_name,
            discovered = tools.len(),
            generated = tools_ok.len(),
            failed = errors.len(),
            "tool wrappers generated"
        );

        Ok(ProviderReport {
            package,
            discovered: tools.len(),
            tool_count: tools_ok.len(),
            tools: tools_ok,
            paths,
            init_path,
            verification,
            errors,
        })
    }

    fn render_tool(
        &self,
        provider_name: &str,
        package: &str,
        function: &str,
        tool: &Tool,
    ) -> Result<String, GenerationError> {
        let params = parse_params(tool)?;
        let signature = params
            .iter()
            .map(|p| {
                if p.required {
                    format!("{}: {}", p.ident, p.py_type)
                } else {
                    format!("{}: Optional[{}] = None", p.ident, p.py_type)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let source = self.templates.get_template(TOOL_TEMPLATE)?.render(minijinja::context! {
            provider => package,
            tool => function,
            function => function,
            signature => signature,
            docstring => python_string(&docstring(provider_name, tool, &params)),
            params => params,
            provider_literal => python_string(provider_name),
            tool_literal => python_string(&tool.name),
        })?;
        Ok(source + "\n")
    }
}

fn malformed(tool: &Tool, reason: impl Into<String>) -> GenerationError {
    GenerationError::MalformedSchema {
        tool: tool.name.clone(),
        reason: reason.into(),
    }
}

/// Derive wrapper parameters from a JSON schema. Required parameters come
/// first, each group in property order.
fn parse_params(tool: &Tool) -> Result<Vec<Param>, GenerationError> {
    let schema = match &tool.input_schema {
        Value::Null => return Ok(Vec::new()),
        Value::Object(schema) => schema,
        _ => return Err(malformed(tool, "schema must be an object")),
    };

    let empty = Map::new();
    let properties = match schema.get("properties") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(properties)) => properties,
        Some(_) => return Err(malformed(tool, "'properties' must be an object")),
    };

    let required: BTreeSet<&str> = match schema.get("required") {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| malformed(tool, "'required' must list strings")))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(malformed(tool, "'required' must be an array")),
    };

    let mut seen = HashSet::new();
    let mut required_params = Vec::new();
    let mut optional_params = Vec::new();

    for (name, property) in properties {
        let property = match property {
            Value::Object(property) => property,
            Value::Bool(true) => &empty,
            _ => return Err(malformed(tool, format!("property '{}' must be a schema object", name))),
        };
        let is_required = required.contains(name.as_str());
        let param = Param {
            name: name.clone(),
            key: python_string(name),
            ident: unique_name(python_identifier(name), &mut seen),
            py_type: python_type(property),
            required: is_required,
            description: property
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        if is_required {
            required_params.push(param);
        } else {
            optional_params.push(param);
        }
    }

    // Required names with no property declaration still reach the server.
    for name in required.iter().filter(|name| !properties.contains_key(**name)) {
        required_params.push(Param {
            name: name.to_string(),
            key: python_string(name),
            ident: unique_name(python_identifier(name), &mut seen),
            py_type: "Any",
            required: true,
            description: String::new(),
        });
    }

    required_params.extend(optional_params);
    Ok(required_params)
}

fn python_type(property: &Map<String, Value>) -> &'static str {
    let ty = match property.get("type") {
        Some(Value::String(ty)) => Some(ty.as_str()),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    };
    match ty {
        Some("string") => "str",
        Some("integer") => "int",
        Some("number") => "float",
        Some("boolean") => "bool",
        Some("array") => "list",
        Some("object") => "dict",
        _ => "Any",
    }
}

fn docstring(provider_name: &str, tool: &Tool, params: &[Param]) -> String {
    let mut doc = if tool.description.trim().is_empty() {
        format!("Call `{}` on the `{}` server.", tool.name, provider_name)
    } else {
        tool.description.trim().to_string()
    };
    if !params.is_empty() {
        doc.push_str("\n\n    Args:");
        for p in params {
            let requirement = if p.required { "required" } else { "optional" };
            doc.push_str(&format!("\n        {} ({}, {})", p.ident, p.py_type, requirement));
            if !p.description.is_empty() {
                doc.push_str(": ");
                doc.push_str(p.description.trim());
            }
            if p.ident != p.name {
                doc.push_str(&format!(" [sent as {:?}]", p.name));
            }
        }
    }
    doc.push_str("\n    ");
    doc
}

/// A Python string literal. JSON string syntax is a subset of Python's.
fn python_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Map an arbitrary name onto a valid, non-keyword Python identifier.
pub(crate) fn python_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if PYTHON_KEYWORDS.contains(&ident.as_str()) || RESERVED_NAMES.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

fn unique_name(base: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

enum FileState {
    Ok,
    Missing,
    Empty,
}

impl FileState {
    fn describe(&self) -> &'static str {
        match self {
            FileState::Ok => "present",
            FileState::Missing => "file missing",
            FileState::Empty => "file empty",
        }
    }

    fn record(self, verification: &mut Verification, path: PathBuf) {
        match self {
            FileState::Ok => {}
            FileState::Missing => verification.missing.push(path),
            FileState::Empty => verification.empty.push(path),
        }
    }
}

fn check_file(path: &Path) -> FileState {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => FileState::Ok,
        Ok(meta) if meta.is_file() => FileState::Empty,
        _ => FileState::Missing,
    }
}
