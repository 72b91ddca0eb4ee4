// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use chrono::{DateTime, Utc};
use std::hint;

/// A source of wall-clock time.
///
/// The generator and the allocator read time only through this trait so
/// that a mocked clock can be plugged in for tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Spins until `clock` reads a millisecond strictly after `last` and returns it.
///
/// Used when the sequence space of a millisecond is exhausted; the wait is
/// bounded by the remainder of the current millisecond on a sane clock.
pub fn wait_next_millis(clock: &dyn Clock, last: i64) -> i64 {
    let mut now = clock.now_millis();
    while now <= last {
        hint::spin_loop();
        now = clock.now_millis();
    }
    now
}
