// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use thiserror::Error;

/// Convenience type alias for errors coming out of collaborators.
pub type BoxDynError = Box<dyn StdError + 'static + Send + Sync>;

/// The error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "invalid bit length configuration: sequence({0}) >= 1, 1 <= worker_id({1}) <= 16 and sequence + worker_id + sharding({2}) < 50 required"
    )]
    InvalidBitLength(u8, u8, u8),
    #[error("epoch `{0}` is ahead of current time")]
    EpochAheadOfCurrentTime(DateTime<Utc>),
    #[error("worker_id returned an error: {0}")]
    WorkerIdFailed(#[source] BoxDynError),
    #[error("check_worker_id returned false")]
    CheckWorkerIdFailed,
    #[error("could not find any private ipv4 address")]
    NoPrivateIPv4,
    #[error("clock moved backwards by {delta}ms, tolerance is {tolerance}ms")]
    ClockMovedBackwards { delta: i64, tolerance: i64 },
    #[error("over the time limit")]
    OverTimeLimit,
    #[error("sharding is configured, a shard value is required")]
    ShardValueRequired,
    #[error("invalid rule id `{0}`")]
    InvalidRuleId(String),
    #[error("failed to load segment for rule `{rule_id}`: {source}")]
    Load {
        rule_id: String,
        #[source]
        source: BoxDynError,
    },
}
