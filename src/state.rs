// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::AuthEngine;
use crate::clock::{Clock, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub engine: AuthEngine,
    /// Time source for request evaluation
    pub clock: Arc<dyn Clock>,
    /// Lowercased `Host` values the service answers for; empty accepts any
    pub allowed_hosts: Arc<[String]>,
}

impl AppState {
    pub fn new(engine: AuthEngine) -> Self {
        Self {
            engine,
            clock: Arc::new(SystemClock),
            allowed_hosts: Arc::from(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_hosts = Arc::from(hosts);
        self
    }

    /// Whether `host` (optionally with a port) is one the service answers for.
    ///
    /// An entry without a port matches the host on any port.
    pub fn is_allowed_host(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        let bare = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host.as_str(),
        };
        self.allowed_hosts
            .iter()
            .any(|allowed| allowed.as_str() == host || allowed.as_str() == bare)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::engine::tests::engine_with;
    use crate::auth::testing::CountingKeySource;

    fn state(hosts: &[&str]) -> AppState {
        AppState::new(engine_with(Arc::new(CountingKeySource::standard())))
            .with_allowed_hosts(hosts.iter().map(|h| h.to_string()).collect())
    }

    #[test]
    fn empty_list_accepts_any_host() {
        assert!(state(&[]).is_allowed_host("anything.example.com"));
    }

    #[test]
    fn hosts_match_with_and_without_port() {
        let state = state(&["app.example.com", "localhost:3000"]);

        assert!(state.is_allowed_host("app.example.com"));
        assert!(state.is_allowed_host("APP.example.com:8443"));
        assert!(state.is_allowed_host("localhost:3000"));
        assert!(!state.is_allowed_host("localhost:4000"));
        assert!(!state.is_allowed_host("evil.example.com"));
    }
}
