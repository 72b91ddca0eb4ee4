// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Double-buffered segments per rule id.
//!
//! Each rule keeps two [`Segment`] slots. Numbers are handed out from the
//! active slot under a shared read lock; the write lock is only taken to flip
//! to the standby slot or to install a freshly fetched range.

use crate::rule::Rule;
use crate::segment::Segment;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

struct Slots {
    segments: [Segment; 2],
    active: usize,
}

impl Slots {
    fn active(&self) -> &Segment {
        &self.segments[self.active]
    }

    fn standby(&self) -> &Segment {
        &self.segments[1 - self.active]
    }
}

/// The two segments of a single rule.
pub struct DoubleBuffer {
    rule: Arc<Rule>,
    slots: RwLock<Slots>,
    preload_in_flight: AtomicBool,
}

impl DoubleBuffer {
    pub fn new(rule: Arc<Rule>) -> Self {
        Self {
            rule,
            slots: RwLock::new(Slots {
                segments: [Segment::empty(), Segment::empty()],
                active: 0,
            }),
            preload_in_flight: AtomicBool::new(false),
        }
    }

    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// Hands out the next number, flipping to the standby slot when the
    /// active one is used up. `None` when neither slot can serve `today`.
    pub fn next_id(&self, today: NaiveDate) -> Option<i64> {
        let mode = self.rule.mode();
        loop {
            {
                let slots = self.slots.read();
                let active = slots.active();
                if active.is_usable(mode, today) {
                    let value = active.increment_and_get();
                    if value <= active.max() {
                        return Some(value);
                    }
                } else if !slots.standby().is_usable(mode, today) {
                    return None;
                }
            }

            let mut slots = self.slots.write();
            if !slots.active().is_usable(mode, today) {
                if !slots.standby().is_usable(mode, today) {
                    return None;
                }
                slots.active = 1 - slots.active;
                self.preload_in_flight.store(false, Ordering::Release);
                tracing::debug!(
                    rule_id = self.rule.id(),
                    slot = slots.active,
                    "switched segment"
                );
            }
        }
    }

    /// Whether the active slot has dropped to the pre-fetch threshold with
    /// no pre-fetch claimed yet and nothing usable waiting in the standby slot.
    pub fn needs_preload(&self, today: NaiveDate) -> bool {
        if self.preload_in_flight.load(Ordering::Acquire) {
            return false;
        }
        let slots = self.slots.read();
        !slots.standby().is_usable(self.rule.mode(), today)
            && slots.active().remaining() as f64 <= self.rule.preload_threshold()
    }

    /// Claims the pre-fetch for the current flip cycle. Only one caller wins.
    pub fn begin_preload(&self, today: NaiveDate) -> bool {
        self.needs_preload(today)
            && self
                .preload_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Gives up a claimed pre-fetch so a later call may retry it.
    pub fn release_preload(&self) {
        self.preload_in_flight.store(false, Ordering::Release);
    }

    /// Installs a range fetched synchronously and hands out its first number.
    ///
    /// A standby range that does not lie above the new one is dropped.
    pub fn seed(
        &self,
        current: i64,
        max: i64,
        created_on: NaiveDate,
        today: NaiveDate,
    ) -> Option<i64> {
        let mode = self.rule.mode();
        let seeded = Segment::new(current, max, created_on);
        if seeded.is_stale(mode, today) {
            return None;
        }
        let mut slots = self.slots.write();

        if slots.active().is_usable(mode, today) {
            // a pre-fetched range was switched to while this one was loading
            let standby = 1 - slots.active;
            if !slots.segments[standby].is_usable(mode, today)
                && seeded.supersedes(slots.active(), mode)
            {
                slots.segments[standby] = seeded;
            }
        } else if !seeded.supersedes(slots.active(), mode) {
            // a later range was switched to and drained meanwhile, or the
            // counter went backwards; the caller reserves again
            tracing::warn!(
                rule_id = self.rule.id(),
                max,
                active_max = slots.active().max(),
                "reserved range does not follow the active one, dropping it"
            );
            return None;
        } else {
            let active = slots.active;
            slots.segments[active] = seeded;
            let standby = 1 - active;
            if slots.segments[standby].is_usable(mode, today)
                && !slots.segments[standby].supersedes(&slots.segments[active], mode)
            {
                slots.segments[standby] = Segment::empty();
                self.release_preload();
            }
        }

        let active = slots.active();
        let value = active.increment_and_get();
        (value <= active.max()).then_some(value)
    }

    /// Installs a pre-fetched range into the standby slot.
    ///
    /// The range is dropped, and the claim released, when it is already
    /// stale, when the standby slot still holds usable numbers, or when it
    /// would not follow the active range.
    pub fn preload(
        &self,
        current: i64,
        max: i64,
        created_on: NaiveDate,
        today: NaiveDate,
    ) -> bool {
        let mode = self.rule.mode();
        let segment = Segment::new(current, max, created_on);
        let mut slots = self.slots.write();

        let installable = segment.is_usable(mode, today)
            && !slots.standby().is_usable(mode, today)
            && segment.supersedes(slots.active(), mode);
        if installable {
            let standby = 1 - slots.active;
            slots.segments[standby] = segment;
            tracing::debug!(rule_id = self.rule.id(), max, "pre-fetched segment installed");
        } else {
            self.release_preload();
            tracing::debug!(rule_id = self.rule.id(), max, "pre-fetched segment dropped");
        }
        installable
    }

    /// Snapshot of `(remaining in active, remaining in standby)`.
    pub fn remaining(&self) -> (i64, i64) {
        let slots = self.slots.read();
        (slots.active().remaining(), slots.standby().remaining())
    }
}

/// Process-wide cache of double buffers, created lazily per rule id.
#[derive(Default)]
pub struct SegmentBuffer {
    buffers: RwLock<HashMap<String, Arc<DoubleBuffer>>>,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rule_id: &str) -> Option<Arc<DoubleBuffer>> {
        self.buffers.read().get(rule_id).cloned()
    }

    pub fn get_or_create(&self, rule: &Arc<Rule>) -> Arc<DoubleBuffer> {
        if let Some(buffer) = self.get(rule.id()) {
            return buffer;
        }
        Arc::clone(
            self.buffers
                .write()
                .entry(rule.id().to_owned())
                .or_insert_with(|| Arc::new(DoubleBuffer::new(Arc::clone(rule)))),
        )
    }

    pub fn next_id(&self, rule_id: &str, today: NaiveDate) -> Option<i64> {
        self.get(rule_id)?.next_id(today)
    }

    pub fn needs_preload(&self, rule_id: &str, today: NaiveDate) -> bool {
        self.get(rule_id)
            .is_some_and(|buffer| buffer.needs_preload(today))
    }

    pub fn seed(
        &self,
        rule: &Arc<Rule>,
        current: i64,
        max: i64,
        created_on: NaiveDate,
        today: NaiveDate,
    ) -> Option<i64> {
        self.get_or_create(rule).seed(current, max, created_on, today)
    }

    pub fn preload(
        &self,
        rule_id: &str,
        current: i64,
        max: i64,
        created_on: NaiveDate,
        today: NaiveDate,
    ) -> bool {
        self.get(rule_id)
            .is_some_and(|buffer| buffer.preload(current, max, created_on, today))
    }

    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }
}
