// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::builder::Builder;
use crate::clock::{Clock, wait_next_millis};
use crate::error::*;
use chrono::prelude::*;
use parking_lot::Mutex;
use std::{sync::Arc, thread, time::Duration};

/// Total bits available below the sign bit.
const BIT_LEN_TOTAL: u8 = 63;

/// Bit widths of the sections of an id, most-significant first:
/// `[sign][time][worker_id][sequence][sharding]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub bit_len_time: u8,
    pub bit_len_worker_id: u8,
    pub bit_len_sequence: u8,
    pub bit_len_sharding: u8,
}

impl Layout {
    pub(crate) fn new(bit_len_sequence: u8, bit_len_worker_id: u8, bit_len_sharding: u8) -> Self {
        Self {
            bit_len_time: BIT_LEN_TOTAL - bit_len_sequence - bit_len_worker_id - bit_len_sharding,
            bit_len_worker_id,
            bit_len_sequence,
            bit_len_sharding,
        }
    }

    fn time_shift(&self) -> u8 {
        self.bit_len_worker_id + self.bit_len_sequence + self.bit_len_sharding
    }

    fn worker_id_shift(&self) -> u8 {
        self.bit_len_sequence + self.bit_len_sharding
    }

    fn sequence_mask(&self) -> u64 {
        (1 << self.bit_len_sequence) - 1
    }

    fn worker_id_mask(&self) -> u64 {
        (1 << self.bit_len_worker_id) - 1
    }

    fn sharding_mask(&self) -> u64 {
        (1 << self.bit_len_sharding) - 1
    }
}

/// Mutable state of a generator, guarded by the generator's mutex.
#[derive(Debug)]
pub(crate) struct Internals {
    pub(crate) last_millis: i64,
    pub(crate) sequence: u64,
}

/// SharedSnowflake is shared between Snowflake instances.
/// This struct is not exposed to the public.
pub(crate) struct SharedSnowflake {
    pub(crate) epoch_millis: i64,
    pub(crate) worker_id: u64,
    pub(crate) layout: Layout,
    pub(crate) max_tolerate_millis: i64,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) internals: Mutex<Internals>,
}

/// Snowflake is a distributed unique ID generator.
/// It is thread-safe and can be cloned to be used in multiple threads.
pub struct Snowflake(pub(crate) Arc<SharedSnowflake>);

impl Snowflake {
    /// Create a new Snowflake with the default configuration.
    /// For custom configuration see [`builder`].
    ///
    /// [`builder`]: struct.Snowflake.html#method.builder
    pub fn new() -> Result<Self, Error> {
        Builder::new().finalize()
    }

    /// Create a new [`Builder`] to construct a Snowflake.
    ///
    /// [`Builder`]: struct.Builder.html
    pub fn builder<'a>() -> Builder<'a> {
        Builder::new()
    }

    pub(crate) fn new_inner(shared: Arc<SharedSnowflake>) -> Self {
        Self(shared)
    }

    /// The bit layout this generator packs ids with.
    pub fn layout(&self) -> Layout {
        self.0.layout
    }

    /// Generate the next unique id.
    ///
    /// Fails with [`Error::ShardValueRequired`] when the generator was built
    /// with sharding bits; use [`next_id_with_shard`] then.
    ///
    /// [`next_id_with_shard`]: struct.Snowflake.html#method.next_id_with_shard
    pub fn next_id(&self) -> Result<u64, Error> {
        if self.0.layout.bit_len_sharding > 0 {
            return Err(Error::ShardValueRequired);
        }
        self.generate(0)
    }

    /// Generate the next unique id carrying `shard_value` in its low bits.
    /// Bits of `shard_value` beyond the sharding width are dropped.
    pub fn next_id_with_shard(&self, shard_value: u64) -> Result<u64, Error> {
        self.generate(shard_value)
    }

    fn generate(&self, shard_value: u64) -> Result<u64, Error> {
        let shared = &self.0;
        let layout = shared.layout;
        let mut internals = shared.internals.lock();

        let mut now = shared.clock.now_millis();
        if now < internals.last_millis {
            now = self.wait_for_clock(internals.last_millis, now)?;
        }

        if now == internals.last_millis {
            internals.sequence = (internals.sequence + 1) & layout.sequence_mask();
            if internals.sequence == 0 {
                now = wait_next_millis(shared.clock.as_ref(), internals.last_millis);
            }
        } else {
            internals.sequence = 0;
        }
        internals.last_millis = now;

        let elapsed = now - shared.epoch_millis;
        if elapsed < 0 || elapsed >= 1 << layout.bit_len_time {
            return Err(Error::OverTimeLimit);
        }

        Ok((elapsed as u64) << layout.time_shift()
            | shared.worker_id << layout.worker_id_shift()
            | internals.sequence << layout.bit_len_sharding
            | (shard_value & layout.sharding_mask()))
    }

    /// Sleeps out a backwards clock jump smaller than the tolerance.
    #[cold]
    fn wait_for_clock(&self, last_millis: i64, now: i64) -> Result<i64, Error> {
        let tolerance = self.0.max_tolerate_millis;
        let delta = last_millis - now;
        if delta >= tolerance {
            return Err(Error::ClockMovedBackwards { delta, tolerance });
        }

        tracing::warn!(delta, "clock moved backwards, waiting for it to catch up");
        thread::sleep(Duration::from_millis(delta as u64));

        let now = self.0.clock.now_millis();
        if now < last_millis {
            return Err(Error::ClockMovedBackwards {
                delta: last_millis - now,
                tolerance,
            });
        }
        Ok(now)
    }

    /// Returns the instant encoded in `id`.
    pub fn decode_timestamp(&self, id: u64) -> Option<DateTime<Utc>> {
        let elapsed = (id >> self.0.layout.time_shift()) as i64;
        DateTime::from_timestamp_millis(self.0.epoch_millis + elapsed)
    }

    /// Break an id up into its parts.
    pub fn decompose(&self, id: u64) -> DecomposedSnowflake {
        let layout = self.0.layout;
        DecomposedSnowflake {
            id,
            msb: id >> BIT_LEN_TOTAL,
            time: (id >> layout.time_shift()) & ((1 << layout.bit_len_time) - 1),
            worker_id: (id >> layout.worker_id_shift()) & layout.worker_id_mask(),
            sequence: (id >> layout.bit_len_sharding) & layout.sequence_mask(),
            shard: id & layout.sharding_mask(),
        }
    }
}

/// Returns a new `Snowflake` referencing the same state as `self`.
/// This is used for concurrent use.
impl Clone for Snowflake {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// DecomposedSnowflake is the parts of a Snowflake ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecomposedSnowflake {
    pub id: u64,
    pub msb: u64,
    /// Milliseconds since the generator's epoch.
    pub time: u64,
    pub worker_id: u64,
    pub sequence: u64,
    pub shard: u64,
}
