// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::Snowflake;
use crate::clock::{Clock, SystemClock};
use crate::error::{BoxDynError, Error};
use crate::snowflake::{Internals, Layout, SharedSnowflake};
use chrono::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

#[cfg(feature = "ip-fallback")]
use std::net::{IpAddr, Ipv4Addr};

/// Upper bound (exclusive) on `sequence + worker_id + sharding` bits.
pub(crate) const MAX_NON_TIME_BITS: u8 = 50;

/// Worker ids are `u16`, so the worker id section is at most this wide.
pub(crate) const MAX_WORKER_ID_BITS: u8 = 16;

/// Default tolerance for a clock moving backwards, in milliseconds.
pub const DEFAULT_MAX_TOLERATE_MILLIS: i64 = 1000;

/// A builder for building the [`Snowflake`] generator.
///
/// [`Snowflake`]: struct.Snowflake.html
pub struct Builder<'a> {
    epoch: Option<DateTime<Utc>>,
    worker_id: Option<&'a dyn Fn() -> Result<u16, BoxDynError>>,
    check_worker_id: Option<&'a dyn Fn(u16) -> bool>,
    clock: Option<Arc<dyn Clock>>,
    bit_len_sequence: u8,
    bit_len_worker_id: u8,
    bit_len_sharding: u8,
    max_tolerate_millis: i64,
}

impl<'a> Default for Builder<'a> {
    fn default() -> Self {
        Builder::new()
    }
}

impl<'a> Builder<'a> {
    /// Construct a new builder for the build of [`Snowflake`].
    ///
    /// [`Snowflake`]: struct.Snowflake.html
    pub fn new() -> Self {
        Self {
            epoch: None,
            worker_id: None,
            check_worker_id: None,
            clock: None,
            bit_len_sequence: 12,
            bit_len_worker_id: 10,
            bit_len_sharding: 0,
            max_tolerate_millis: DEFAULT_MAX_TOLERATE_MILLIS,
        }
    }

    /// Set the custom epoch all timestamps are relative to.
    /// If the epoch is later than the current time, `finalize` will fail.
    pub fn epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Set the worker ID.
    /// If the provided closure returns an error, `finalize` will fail.
    pub fn worker_id(mut self, worker_id: &'a dyn Fn() -> Result<u16, BoxDynError>) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Set up a function to check the worker ID.
    /// If the function returns `false`, `finalize` will fail.
    pub fn check_worker_id(mut self, check_worker_id: &'a dyn Fn(u16) -> bool) -> Self {
        self.check_worker_id = Some(check_worker_id);
        self
    }

    /// Set the clock the generator reads time from.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the bit length of the sequence section.
    pub fn bit_len_sequence(mut self, bit_len_sequence: u8) -> Self {
        self.bit_len_sequence = bit_len_sequence;
        self
    }

    /// Set the bit length of the worker ID section, between 1 and 16.
    pub fn bit_len_worker_id(mut self, bit_len_worker_id: u8) -> Self {
        self.bit_len_worker_id = bit_len_worker_id;
        self
    }

    /// Set the bit length of the sharding key section. Zero disables sharding.
    pub fn bit_len_sharding(mut self, bit_len_sharding: u8) -> Self {
        self.bit_len_sharding = bit_len_sharding;
        self
    }

    /// Set how far the clock may move backwards, in milliseconds, before
    /// `next_id` gives up instead of waiting.
    pub fn max_tolerate_millis(mut self, max_tolerate_millis: i64) -> Self {
        self.max_tolerate_millis = max_tolerate_millis;
        self
    }

    /// Finish building and create a Snowflake instance.
    /// This method will return an error if any of the configured functions return an error or if validation fails.
    pub fn finalize(self) -> Result<Snowflake, Error> {
        let non_time_bits = u16::from(self.bit_len_sequence)
            + u16::from(self.bit_len_worker_id)
            + u16::from(self.bit_len_sharding);
        if self.bit_len_sequence < 1
            || self.bit_len_worker_id < 1
            || self.bit_len_worker_id > MAX_WORKER_ID_BITS
            || non_time_bits >= u16::from(MAX_NON_TIME_BITS)
        {
            return Err(Error::InvalidBitLength(
                self.bit_len_sequence,
                self.bit_len_worker_id,
                self.bit_len_sharding,
            ));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let epoch = match self.epoch {
            Some(epoch) => {
                if epoch > clock.now() {
                    return Err(Error::EpochAheadOfCurrentTime(epoch));
                }
                epoch
            }
            // Default epoch
            None => Utc
                .with_ymd_and_hms(2022, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
        };

        let worker_id_mask: u64 = (1 << self.bit_len_worker_id) - 1;
        let worker_id = match self.worker_id {
            Some(worker_id_fn) => worker_id_fn().map_err(Error::WorkerIdFailed)?,
            None => fallback_worker_id(worker_id_mask)?,
        };

        if u64::from(worker_id) > worker_id_mask {
            return Err(Error::WorkerIdFailed(
                format!(
                    "Worker ID {} is greater than the max allowed value {}",
                    worker_id, worker_id_mask
                )
                .into(),
            ));
        }

        if let Some(check_worker_id) = self.check_worker_id
            && !check_worker_id(worker_id)
        {
            return Err(Error::CheckWorkerIdFailed);
        }

        let shared = Arc::new(SharedSnowflake {
            epoch_millis: epoch.timestamp_millis(),
            worker_id: u64::from(worker_id),
            layout: Layout::new(
                self.bit_len_sequence,
                self.bit_len_worker_id,
                self.bit_len_sharding,
            ),
            max_tolerate_millis: self.max_tolerate_millis,
            clock,
            internals: Mutex::new(Internals {
                last_millis: 0,
                sequence: 0,
            }),
        });
        Ok(Snowflake::new_inner(shared))
    }
}

#[cfg(feature = "ip-fallback")]
fn fallback_worker_id(worker_id_mask: u64) -> Result<u16, Error> {
    match worker_id_from_ip() {
        Some(worker_id) => Ok((u64::from(worker_id) & worker_id_mask) as u16),
        None => Err(Error::NoPrivateIPv4),
    }
}

#[cfg(not(feature = "ip-fallback"))]
fn fallback_worker_id(_worker_id_mask: u64) -> Result<u16, Error> {
    Err(Error::WorkerIdFailed(
        "Worker ID not provided and `ip-fallback` feature is disabled".into(),
    ))
}

/// Derive the worker ID from the private IP address (v4 or v6).
#[cfg(feature = "ip-fallback")]
fn worker_id_from_ip() -> Option<u16> {
    if let Some(ipv4) = private_ipv4() {
        let octets = ipv4.octets();
        // IPv4: Use bytes 3 and 4
        return Some(u16::from_be_bytes([octets[2], octets[3]]));
    }

    // IPv6: Use the last 16-bit segment
    private_ipv6().map(|ipv6| ipv6.segments()[7])
}

#[cfg(feature = "ip-fallback")]
fn private_ipv4() -> Option<Ipv4Addr> {
    pnet_datalink::interfaces()
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
        .flat_map(|iface| iface.ips.iter())
        .find_map(|network| match network.ip() {
            IpAddr::V4(ipv4) if is_private_ipv4(&ipv4) => Some(ipv4),
            _ => None,
        })
}

#[cfg(feature = "ip-fallback")]
fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    matches!(octets[0], 10)
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

#[cfg(feature = "ip-fallback")]
fn private_ipv6() -> Option<std::net::Ipv6Addr> {
    pnet_datalink::interfaces()
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
        .flat_map(|iface| iface.ips.iter())
        .find_map(|network| match network.ip() {
            IpAddr::V6(ipv6) if is_private_ipv6(&ipv6) => Some(ipv6),
            _ => None,
        })
}

#[cfg(feature = "ip-fallback")]
fn is_private_ipv6(ip: &std::net::Ipv6Addr) -> bool {
    // fc00::/7 (Unique Local Address)
    // fe80::/10 (Link-Local Address)
    (ip.segments()[0] & 0xfe00) == 0xfc00 || (ip.segments()[0] & 0xffc0) == 0xfe80
}
