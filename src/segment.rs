// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::rule::Mode;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicI64, Ordering};

/// A contiguous range of numbers `(current, max]` owned locally.
///
/// `current` is the last number handed out; the next one is `current + 1`.
#[derive(Debug)]
pub struct Segment {
    max: i64,
    current: AtomicI64,
    created_on: NaiveDate,
}

impl Segment {
    pub fn new(current: i64, max: i64, created_on: NaiveDate) -> Self {
        Self {
            max,
            current: AtomicI64::new(current),
            created_on,
        }
    }

    /// A segment with nothing left in it.
    pub fn empty() -> Self {
        Self::new(0, 0, NaiveDate::MIN)
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn created_on(&self) -> NaiveDate {
        self.created_on
    }

    /// Claims the next number. May run past `max` under contention; callers
    /// must discard a result above `max`.
    pub fn increment_and_get(&self) -> i64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn remaining(&self) -> i64 {
        self.max - self.current()
    }

    pub fn is_exhausted(&self) -> bool {
        self.current() >= self.max
    }

    /// Whether `today` falls outside the cadence window the segment was created in.
    pub fn is_stale(&self, mode: Mode, today: NaiveDate) -> bool {
        !mode.same_window(self.created_on, today)
    }

    pub(crate) fn is_usable(&self, mode: Mode, today: NaiveDate) -> bool {
        !self.is_exhausted() && !self.is_stale(mode, today)
    }

    /// Whether handing out numbers from `self` after `other` keeps them
    /// increasing: a later cadence window, or a higher range in the same one.
    pub(crate) fn supersedes(&self, other: &Segment, mode: Mode) -> bool {
        if mode.same_window(self.created_on, other.created_on) {
            self.current() >= other.max
        } else {
            self.created_on > other.created_on
        }
    }
}
