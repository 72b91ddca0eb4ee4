// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{BoxDynError, Clock, Counter, MemoryCounter, PreloadTask, Spawner};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Returns scripted millisecond readings in order, then repeats the last one.
/// `now()` reports the real time so builder checks are unaffected.
pub struct ScriptedClock {
    readings: Mutex<VecDeque<i64>>,
    last: Mutex<i64>,
}

impl ScriptedClock {
    pub fn new(readings: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(readings.iter().copied().collect()),
            last: Mutex::new(readings.first().copied().unwrap_or_default()),
        })
    }
}

impl Clock for ScriptedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_millis(&self) -> i64 {
        let mut last = self.last.lock();
        if let Some(next) = self.readings.lock().pop_front() {
            *last = next;
        }
        *last
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(rfc3339: &str) -> Arc<Self> {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .expect("valid timestamp")
            .with_timezone(&Utc);
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, rfc3339: &str) {
        *self.now.lock() = DateTime::parse_from_rfc3339(rfc3339)
            .expect("valid timestamp")
            .with_timezone(&Utc);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A [`MemoryCounter`] that counts calls and can be switched to failing.
#[derive(Default)]
pub struct CountingCounter {
    pub inner: MemoryCounter,
    pub increments: AtomicUsize,
    pub expires: AtomicUsize,
    /// Number of increments that succeed before every later one fails.
    pub fail_after: Option<usize>,
}

impl CountingCounter {
    pub fn failing_after(successes: usize) -> Self {
        Self {
            fail_after: Some(successes),
            ..Self::default()
        }
    }

    pub fn increments(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }
}

impl Counter for CountingCounter {
    fn increment_by(&self, key: &str, step: i64) -> Result<i64, BoxDynError> {
        let calls = self.increments.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|n| calls >= n) {
            return Err("counter unavailable".into());
        }
        self.inner.increment_by(key, step)
    }

    fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), BoxDynError> {
        self.expires.fetch_add(1, Ordering::SeqCst);
        self.inner.expire(key, ttl_seconds)
    }
}

/// Runs pre-fetches on the calling thread.
pub fn inline_spawner() -> Spawner {
    Arc::new(|task: PreloadTask| {
        task();
        Ok(())
    })
}

/// Queues pre-fetches until the test runs them.
pub fn deferred_spawner() -> (Spawner, Arc<Mutex<Vec<PreloadTask>>>) {
    let queue = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&queue);
    let spawner: Spawner = Arc::new(move |task: PreloadTask| {
        sink.lock().push(task);
        Ok(())
    });
    (spawner, queue)
}
