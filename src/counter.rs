// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::error::BoxDynError;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// The shared monotonic counter segments are carved from.
///
/// Implementations are normally backed by a remote key-value store and must
/// not lose increments between concurrent callers, across processes. They
/// should bound each round trip with a timeout of their own: the allocator
/// holds a per-rule lock while waiting on a synchronous reload.
pub trait Counter: Send + Sync + 'static {
    /// Atomically adds `step` to `key` and returns the new value. A missing
    /// key counts from zero.
    fn increment_by(&self, key: &str, step: i64) -> Result<i64, BoxDynError>;

    /// Drops `key` after `ttl_seconds`.
    fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), BoxDynError>;
}

#[derive(Debug)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An in-process [`Counter`], for single-process deployments and tests.
/// Expired keys are dropped lazily on the next access.
#[derive(Debug, Default)]
pub struct MemoryCounter {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<i64> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Remaining time to live of `key`, if one is set.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

impl Counter for MemoryCounter {
    fn increment_by(&self, key: &str, step: i64) -> Result<i64, BoxDynError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: 0,
                expires_at: None,
            };
        }
        entry.value = entry
            .value
            .checked_add(step)
            .ok_or_else(|| format!("counter `{key}` overflowed"))?;
        Ok(entry.value)
    }

    fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), BoxDynError> {
        let ttl = Duration::from_secs(u64::try_from(ttl_seconds)?);
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
