//! Outbound connection allow-list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Hosts that are always reachable. The child's own event loop and the tool
/// bridge both depend on loopback connections.
pub const LOOPBACK_HOSTS: &[&str] = &["127.0.0.1", "localhost", "::1", "0.0.0.0"];

/// Default-deny set of `host[:port]` entries.
///
/// Entries may use `*` for a whole dot-separated label, e.g.
/// `*.example.com` or `api.*.internal:8443`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    allowed_endpoints: BTreeSet<String>,
}

impl NetworkPolicy {
    /// Build a policy from an iterator of endpoint entries.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self::default();
        for endpoint in endpoints {
            policy.add_endpoint(endpoint.as_ref());
        }
        policy
    }

    /// Allow an additional endpoint. Blank entries are ignored.
    pub fn add_endpoint(&mut self, endpoint: &str) {
        let endpoint = normalize(endpoint);
        if !endpoint.is_empty() {
            self.allowed_endpoints.insert(endpoint);
        }
    }

    /// Remove an endpoint. Returns whether it was present.
    pub fn remove_endpoint(&mut self, endpoint: &str) -> bool {
        self.allowed_endpoints.remove(&normalize(endpoint))
    }

    /// The configured entries, sorted.
    pub fn allowed_endpoints(&self) -> impl Iterator<Item = &str> {
        self.allowed_endpoints.iter().map(String::as_str)
    }

    /// Whether `host` is one of the always-allowed loopback names.
    pub fn is_loopback(host: &str) -> bool {
        let host = normalize(host);
        LOOPBACK_HOSTS.contains(&host.as_str())
    }

    /// Decide whether a connection to `host` (and optionally `port`) may
    /// proceed.
    ///
    /// Loopback always passes. Otherwise the checks are, in order: exact
    /// `host:port`, bare host (any port), then wildcard entries. Nothing
    /// matching means deny.
    pub fn is_allowed(&self, host: &str, port: Option<u16>) -> bool {
        let host = normalize(host);
        if LOOPBACK_HOSTS.contains(&host.as_str()) {
            return true;
        }

        if let Some(port) = port {
            if self.allowed_endpoints.contains(&format!("{}:{}", host, port)) {
                return true;
            }
        }

        if self.allowed_endpoints.contains(&host) {
            return true;
        }

        self.allowed_endpoints
            .iter()
            .filter(|entry| entry.contains('*'))
            .any(|entry| wildcard_matches(entry, &host, port))
    }
}

fn normalize(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

/// Split `host:port` when the suffix is numeric and the host is not an IPv6
/// literal.
fn split_endpoint(entry: &str) -> (&str, Option<u16>) {
    match entry.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            match port.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (entry, None),
            }
        }
        _ => (entry, None),
    }
}

fn wildcard_matches(pattern: &str, host: &str, port: Option<u16>) -> bool {
    let (pattern_host, pattern_port) = split_endpoint(pattern);
    if let Some(required) = pattern_port {
        if port != Some(required) {
            return false;
        }
    }

    let pattern_labels: Vec<&str> = pattern_host.split('.').collect();
    let host_labels: Vec<&str> = host.split('.').collect();
    pattern_labels.len() == host_labels.len()
        && pattern_labels
            .iter()
            .zip(&host_labels)
            .all(|(p, h)| *p == "*" || p == h)
}
