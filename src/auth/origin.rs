// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Development account-portal origin detection.
//!
//! A hostname's classification cannot change while the process runs, so
//! results are memoized forever. The set of hostnames a deployment sees is
//! small, so the map is never evicted.

use std::collections::HashMap;
use std::sync::RwLock;

/// Legacy dev portals: `accounts.<app>.lcl.dev` and friends.
const LEGACY_DEV_SUFFIXES: [&str; 3] = [".lcl.dev", ".lclstage.dev", ".lclclerk.com"];

/// Current dev portals: `<app>.accounts.dev` and friends.
const CURRENT_DEV_SUFFIXES: [&str; 3] = [".accounts.dev", ".accountsstage.dev", ".accounts.lclclerk.com"];

/// Memoizing dev portal classifier.
#[derive(Debug, Default)]
pub struct OriginCache {
    entries: RwLock<HashMap<String, bool>>,
}

impl OriginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `host` is a development account-portal origin.
    ///
    /// Accepts a bare hostname or `host:port`; empty input is always `false`.
    pub fn is_dev_portal_origin(&self, host: &str) -> bool {
        let hostname = normalize(host);
        if hostname.is_empty() {
            return false;
        }

        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(&hostname) {
                return *hit;
            }
        }

        let result = is_legacy_dev_portal(&hostname) || is_current_dev_portal(&hostname);
        if let Ok(mut entries) = self.entries.write() {
            entries.entry(hostname).or_insert(result);
        }
        result
    }

    /// Number of memoized hostnames.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(host: &str) -> String {
    let host = host.trim();
    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

fn is_legacy_dev_portal(host: &str) -> bool {
    host.starts_with("accounts.")
        && LEGACY_DEV_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
}

fn is_current_dev_portal(host: &str) -> bool {
    CURRENT_DEV_SUFFIXES.iter().any(|suffix| {
        host.ends_with(suffix) && !host.ends_with(&format!(".clerk{suffix}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_portals() {
        let cache = OriginCache::new();
        assert!(cache.is_dev_portal_origin("accounts.foo.lcl.dev"));
        assert!(cache.is_dev_portal_origin("accounts.bar.lclstage.dev"));
        assert!(cache.is_dev_portal_origin("accounts.baz.lclclerk.com"));
        assert!(!cache.is_dev_portal_origin("foo.lcl.dev"));
        assert!(!cache.is_dev_portal_origin("accounts.example.com"));
    }

    #[test]
    fn current_portals() {
        let cache = OriginCache::new();
        assert!(cache.is_dev_portal_origin("happy-otter-1.accounts.dev"));
        assert!(cache.is_dev_portal_origin("happy-otter-1.accountsstage.dev"));
        assert!(cache.is_dev_portal_origin("happy-otter-1.accounts.lclclerk.com"));
        // frontend API hosts are not portals
        assert!(!cache.is_dev_portal_origin("happy-otter-1.clerk.accounts.dev"));
        assert!(!cache.is_dev_portal_origin("example.com"));
    }

    #[test]
    fn ports_and_case_are_ignored() {
        let cache = OriginCache::new();
        assert!(cache.is_dev_portal_origin("Happy-Otter-1.Accounts.Dev:443"));
        assert!(!cache.is_dev_portal_origin("localhost:3000"));
    }

    #[test]
    fn empty_host_is_not_cached() {
        let cache = OriginCache::new();
        assert!(!cache.is_dev_portal_origin(""));
        assert!(!cache.is_dev_portal_origin("   "));
        assert!(cache.is_empty());
    }

    #[test]
    fn results_are_memoized_per_hostname() {
        let cache = OriginCache::new();
        cache.is_dev_portal_origin("a.accounts.dev");
        cache.is_dev_portal_origin("a.accounts.dev:8080");
        cache.is_dev_portal_origin("example.com");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_classification() {
        let cache = std::sync::Arc::new(OriginCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let host = format!("app-{}.accounts.dev", i % 2);
                    cache.is_dev_portal_origin(&host)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.len(), 2);
    }
}
