// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Time source and clock-skew policy.
//!
//! Everything that compares timestamps takes its notion of "now" from a
//! [`Clock`] so that tests can pin time without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Default clock skew tolerance (5 seconds).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    unix_secs: AtomicI64,
}

impl ManualClock {
    pub fn at(unix_secs: i64) -> Self {
        Self {
            unix_secs: AtomicI64::new(unix_secs),
        }
    }

    pub fn set(&self, unix_secs: i64) {
        self.unix_secs.store(unix_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.unix_secs
            .fetch_add(by.as_secs() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.unix_secs.load(Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Allowed disagreement between issuer and verifier clocks.
///
/// Only the not-before check is widened by the skew; expiry is strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkewPolicy {
    skew: Duration,
}

impl SkewPolicy {
    pub const fn new(skew: Duration) -> Self {
        Self { skew }
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    pub fn skew_secs(&self) -> i64 {
        self.skew.as_secs() as i64
    }

    /// `true` once `now` has passed `expires_at`.
    pub fn is_expired(&self, expires_at: i64, now: i64) -> bool {
        expires_at < now
    }

    /// `true` while `now` is still more than `skew` before `not_before`.
    pub fn is_not_yet_valid(&self, not_before: i64, now: i64) -> bool {
        now < not_before - self.skew_secs()
    }
}

impl Default for SkewPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_SKEW)
    }
}
