//! Reversible PII tokenization at the tool-call boundary.
//!
//! Sensitive literals (emails, phone numbers, SSNs, card numbers, IPv4
//! addresses) are swapped for opaque tokens like `[EMAIL_3f9a0c21]` before a
//! value reaches anything model-facing, and swapped back before real data is
//! handed to a tool or to the sandboxed program.
//!
//! A tokenizer grows monotonically. Scope one instance per logical task and
//! call [`PrivacyTokenizer::clear`] between unrelated tasks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a detected literal. The tag is the token prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
}

impl PiiType {
    pub fn tag(self) -> &'static str {
        match self {
            PiiType::Email => "EMAIL",
            PiiType::Phone => "PHONE",
            PiiType::Ssn => "SSN",
            PiiType::CreditCard => "CREDIT_CARD",
            PiiType::IpAddress => "IP_ADDRESS",
        }
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Detection patterns, applied in this order. Earlier patterns win: once a
/// span is replaced by a token, later patterns never see it.
static PII_PATTERNS: LazyLock<Vec<(PiiType, Regex)>> = LazyLock::new(|| {
    [
        (PiiType::Email, r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        (
            PiiType::Phone,
            r"\+\d{1,3}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{3,4}[-.\s]?\d{3,4}\b",
        ),
        (PiiType::Phone, r"\(\d{3}\)\s?\d{3}[-.\s]\d{4}\b"),
        (PiiType::Phone, r"\b\d{3}[-.]\d{3}[-.]\d{4}\b"),
        (PiiType::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
        (
            PiiType::CreditCard,
            r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
        ),
        (
            PiiType::IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).unwrap()))
    .collect()
});

/// Snapshot of a tokenizer's mapping table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerStats {
    pub total_tokens: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct TokenMaps {
    token_to_value: HashMap<String, String>,
    value_to_token: HashMap<String, String>,
    by_type: BTreeMap<PiiType, usize>,
}

impl TokenMaps {
    fn token_for(&mut self, kind: PiiType, value: &str) -> String {
        if let Some(token) = self.value_to_token.get(value) {
            return token.clone();
        }

        let token = loop {
            let id = uuid::Uuid::new_v4().simple().to_string();
            let candidate = format!("[{}_{}]", kind.tag(), &id[..8]);
            if !self.token_to_value.contains_key(&candidate) {
                break candidate;
            }
        };

        self.token_to_value.insert(token.clone(), value.to_string());
        self.value_to_token.insert(value.to_string(), token.clone());
        *self.by_type.entry(kind).or_default() += 1;
        token
    }
}

/// Bidirectional `token <-> original` map with PII detection.
///
/// Safe to share across concurrent executions: all mutation happens under
/// one lock, so the same literal seen by two callers converges on one token.
#[derive(Debug, Default)]
pub struct PrivacyTokenizer {
    maps: Mutex<TokenMaps>,
}

impl PrivacyTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn maps(&self) -> MutexGuard<'_, TokenMaps> {
        self.maps.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace every detected PII literal inside `data` with its token.
    pub fn tokenize(&self, data: &Value) -> Value {
        let mut maps = self.maps();
        tokenize_value(&mut maps, data)
    }

    /// Tokenize a single string.
    pub fn tokenize_str(&self, text: &str) -> String {
        let mut maps = self.maps();
        tokenize_text(&mut maps, text)
    }

    /// Replace every known token inside `data` with its original value.
    /// Detection is not re-run.
    pub fn untokenize(&self, data: &Value) -> Value {
        let maps = self.maps();
        untokenize_value(&maps, data)
    }

    /// Untokenize a single string.
    pub fn untokenize_str(&self, text: &str) -> String {
        let maps = self.maps();
        untokenize_text(&maps, text)
    }

    /// Forget every mapping.
    pub fn clear(&self) {
        let mut maps = self.maps();
        *maps = TokenMaps::default();
    }

    pub fn get_stats(&self) -> TokenizerStats {
        let maps = self.maps();
        TokenizerStats {
            total_tokens: maps.token_to_value.len(),
            by_type: maps
                .by_type
                .iter()
                .map(|(kind, count)| (kind.tag().to_string(), *count))
                .collect(),
        }
    }
}

fn tokenize_value(maps: &mut TokenMaps, data: &Value) -> Value {
    match data {
        Value::String(s) => Value::String(tokenize_text(maps, s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| tokenize_value(maps, v)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), tokenize_value(maps, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn tokenize_text(maps: &mut TokenMaps, text: &str) -> String {
    let mut out = text.to_string();
    for (kind, pattern) in PII_PATTERNS.iter() {
        let mut found: Vec<String> = pattern
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        if found.is_empty() {
            continue;
        }
        found.sort();
        found.dedup();
        // Longest first so a literal that contains another is replaced whole.
        found.sort_by_key(|literal| std::cmp::Reverse(literal.len()));

        for literal in found {
            let token = maps.token_for(*kind, &literal);
            out = out.replace(&literal, &token);
        }
    }
    out
}

fn untokenize_value(maps: &TokenMaps, data: &Value) -> Value {
    match data {
        Value::String(s) => Value::String(untokenize_text(maps, s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| untokenize_value(maps, v)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), untokenize_value(maps, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn untokenize_text(maps: &TokenMaps, text: &str) -> String {
    if !text.contains('[') {
        return text.to_string();
    }
    maps.token_to_value
        .iter()
        .fold(text.to_string(), |acc, (token, value)| {
            if acc.contains(token.as_str()) {
                acc.replace(token.as_str(), value)
            } else {
                acc
            }
        })
}
