// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::support::{CountingCounter, ManualClock, deferred_spawner, inline_spawner};
use crate::{Allocator, BoxDynError, Counter, Error, MemoryCounter, Token};
use chrono::FixedOffset;
use std::{
    collections::HashSet,
    sync::{Arc, atomic::Ordering},
    thread,
};

fn offset(hours: i32) -> Result<FixedOffset, BoxDynError> {
    Ok(FixedOffset::east_opt(hours * 3600).ok_or("invalid offset")?)
}

fn inline(counter: CountingCounter) -> Result<Allocator<CountingCounter>, BoxDynError> {
    Ok(Allocator::builder(counter)
        .utc_offset(offset(0)?)
        .spawner(inline_spawner())
        .finalize())
}

fn take<C: Counter>(
    allocator: &Allocator<C>,
    rule_id: &str,
    n: usize,
) -> Result<Vec<i64>, Error> {
    (0..n).map(|_| allocator.next_num(rule_id)).collect()
}

#[test]
fn test_numbers_are_sequential() -> Result<(), BoxDynError> {
    let allocator = inline(CountingCounter::default())?;
    let numbers = take(&allocator, "bill#N#10#0.5", 20)?;

    assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    // one reload, then a pre-fetch at 5 and at 15 numbers left
    assert_eq!(allocator.counter().increments(), 3);
    assert_eq!(allocator.counter().inner.get("numgen:bill#N#10#0.5"), Some(30));
    Ok(())
}

#[test]
fn test_default_step_hits_counter_every_time() -> Result<(), BoxDynError> {
    let allocator = inline(CountingCounter::default())?;
    assert_eq!(take(&allocator, "seq", 5)?, vec![1, 2, 3, 4, 5]);
    assert_eq!(allocator.counter().increments(), 5);
    Ok(())
}

#[test]
fn test_rules_are_independent() -> Result<(), BoxDynError> {
    let allocator = inline(CountingCounter::default())?;
    assert_eq!(allocator.next_num("A#N#5")?, 1);
    assert_eq!(allocator.next_num("B#N#5")?, 1);
    assert_eq!(allocator.next_num("A#N#5")?, 2);
    Ok(())
}

#[test]
fn test_key_prefix() -> Result<(), BoxDynError> {
    let allocator = Allocator::builder(MemoryCounter::new())
        .key_prefix("erp:")
        .spawner(inline_spawner())
        .finalize();
    allocator.next_num("INV#N#3")?;
    assert_eq!(allocator.counter().get("erp:INV#N#3"), Some(3));
    Ok(())
}

#[test]
fn test_first_range_of_day_sets_ttl() -> Result<(), BoxDynError> {
    let clock = ManualClock::at("2026-10-19T23:00:00Z");
    let allocator = Allocator::builder(CountingCounter::default())
        .utc_offset(offset(0)?)
        .clock(clock)
        .spawner(inline_spawner())
        .finalize();

    assert_eq!(allocator.next_num("INV#D#100#0.2")?, 1);

    let counter = allocator.counter();
    let key = "numgen:INV#D#100#0.2:20261019";
    assert_eq!(counter.inner.get(key), Some(100));
    let ttl = counter.inner.ttl(key).ok_or("ttl not set")?.as_secs();
    assert!((3_590..=3_600).contains(&ttl), "unexpected ttl {}", ttl);
    assert_eq!(counter.expires.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_later_ranges_do_not_reset_ttl() -> Result<(), BoxDynError> {
    let clock = ManualClock::at("2026-10-19T08:00:00Z");
    let allocator = Allocator::builder(CountingCounter::default())
        .utc_offset(offset(0)?)
        .clock(clock)
        .spawner(inline_spawner())
        .finalize();

    take(&allocator, "INV#D#10#0.2", 25)?;
    assert!(allocator.counter().increments() >= 3);
    assert_eq!(allocator.counter().expires.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_no_ttl_without_cadence() -> Result<(), BoxDynError> {
    let allocator = inline(CountingCounter::default())?;
    allocator.next_num("INV#N#10")?;
    assert_eq!(allocator.counter().expires.load(Ordering::SeqCst), 0);
    assert_eq!(allocator.counter().inner.ttl("numgen:INV#N#10"), None);
    Ok(())
}

#[test]
fn test_daily_rule_restarts_after_midnight() -> Result<(), BoxDynError> {
    let clock = ManualClock::at("2026-10-19T23:59:58Z");
    let allocator = Allocator::builder(MemoryCounter::new())
        .utc_offset(offset(0)?)
        .clock(clock.clone())
        .spawner(inline_spawner())
        .finalize();

    assert_eq!(allocator.next_num("INV#D#100#0.2")?, 1);
    assert_eq!(allocator.next_num("INV#D#100#0.2")?, 2);

    clock.set("2026-10-20T00:00:01Z");
    assert_eq!(allocator.next_num("INV#D#100#0.2")?, 1);
    assert_eq!(
        allocator.counter().get("numgen:INV#D#100#0.2:20261020"),
        Some(100)
    );
    Ok(())
}

#[test]
fn test_windows_follow_configured_offset() -> Result<(), BoxDynError> {
    // 23:30 UTC is already the next day at UTC+8
    let clock = ManualClock::at("2026-10-19T23:30:00Z");
    let allocator = Allocator::builder(MemoryCounter::new())
        .utc_offset(offset(8)?)
        .clock(clock)
        .spawner(inline_spawner())
        .finalize();

    allocator.next_num("INV#M#10")?;
    allocator.next_num("PO#D#10")?;
    assert_eq!(allocator.counter().get("numgen:INV#M#10:202610"), Some(10));
    assert_eq!(allocator.counter().get("numgen:PO#D#10:20261020"), Some(10));
    Ok(())
}

#[test]
fn test_counter_failure_is_a_load_error() -> Result<(), BoxDynError> {
    let allocator = inline(CountingCounter::failing_after(0))?;
    match allocator.next_num("INV#N#10") {
        Err(Error::Load { rule_id, .. }) => assert_eq!(rule_id, "INV#N#10"),
        other => panic!("expected a load error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_failed_preload_is_retried_and_buffer_keeps_serving() -> Result<(), BoxDynError> {
    // the reload succeeds, every pre-fetch fails
    let allocator = inline(CountingCounter::failing_after(1))?;
    assert_eq!(
        take(&allocator, "INV#N#10#0.5", 10)?,
        (1..=10).collect::<Vec<_>>()
    );
    // each call from 5 left down to 0 retried the pre-fetch
    assert_eq!(allocator.counter().increments(), 1 + 6);
    assert!(matches!(
        allocator.next_num("INV#N#10#0.5"),
        Err(Error::Load { .. })
    ));
    Ok(())
}

#[test]
fn test_invalid_rule_id() -> Result<(), BoxDynError> {
    let allocator = inline(CountingCounter::default())?;
    assert!(matches!(
        allocator.next_num("#D#10"),
        Err(Error::InvalidRuleId(_))
    ));
    assert_eq!(allocator.counter().increments(), 0);
    Ok(())
}

#[test]
fn test_one_preload_per_cycle_under_contention() -> Result<(), BoxDynError> {
    let (spawner, queue) = deferred_spawner();
    let allocator = Allocator::builder(CountingCounter::default())
        .spawner(spawner)
        .finalize();

    take(&allocator, "D#N#100#0.5", 60)?;
    assert_eq!(queue.lock().len(), 1);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let allocator = allocator.clone();
            thread::spawn(move || take(&allocator, "D#N#100#0.5", 4))
        })
        .collect();
    for handle in handles {
        handle.join().expect("Child thread panicked")?;
    }

    assert_eq!(queue.lock().len(), 1);
    assert_eq!(allocator.counter().increments(), 1);

    let task = queue.lock().pop().ok_or("no pre-fetch queued")?;
    task();
    assert_eq!(allocator.counter().increments(), 2);

    // 92 handed out so far; the pre-fetched range follows without a reload
    assert_eq!(
        take(&allocator, "D#N#100#0.5", 100)?,
        (93..=192).collect::<Vec<_>>()
    );
    assert_eq!(allocator.counter().increments(), 2);
    assert_eq!(queue.lock().len(), 1);
    Ok(())
}

#[test]
fn test_concurrent_allocation_is_unique_and_ordered() -> Result<(), BoxDynError> {
    let allocator = Allocator::new(CountingCounter::default());
    let threads = 8;
    let per_thread = 500;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let allocator = allocator.clone();
            thread::spawn(move || take(&allocator, "C#N#50#0.3", per_thread))
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        let numbers = handle.join().expect("Child thread panicked")?;
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        for number in numbers {
            assert!(all.insert(number), "duplicated number {}", number);
        }
    }
    assert_eq!(all.len(), threads * per_thread);
    Ok(())
}

#[test]
fn test_template_tokens_are_cached() {
    let allocator = Allocator::new(MemoryCounter::new());
    let tokens = allocator.template_tokens("INV#D", "INV{yyyyMMdd}{6}");
    assert_eq!(tokens[2], Token::Param(6));
    assert!(Arc::ptr_eq(
        &tokens,
        &allocator.template_tokens("INV#D", "INV{yyyyMMdd}{6}")
    ));
}
