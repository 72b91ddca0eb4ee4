// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::buffer::{DoubleBuffer, SegmentBuffer};
use crate::clock::{Clock, SystemClock};
use crate::counter::Counter;
use crate::error::Error;
use crate::lock::KeyedLocks;
use crate::rule::Rule;
use crate::template::{TemplateCache, Token};
use chrono::prelude::*;
use parking_lot::RwLock;
use std::{collections::HashMap, io, sync::Arc, thread};

/// Default prefix of counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "numgen:";

/// A background pre-fetch, ready to run.
pub type PreloadTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs pre-fetch tasks off the caller's thread.
pub type Spawner = Arc<dyn Fn(PreloadTask) -> io::Result<()> + Send + Sync>;

fn thread_spawner() -> Spawner {
    Arc::new(|task: PreloadTask| {
        thread::Builder::new()
            .name("numgen-preload".into())
            .spawn(task)
            .map(drop)
    })
}

/// A builder for building the [`Allocator`].
///
/// [`Allocator`]: struct.Allocator.html
pub struct AllocatorBuilder<C> {
    counter: C,
    key_prefix: String,
    utc_offset: Option<FixedOffset>,
    clock: Option<Arc<dyn Clock>>,
    spawner: Option<Spawner>,
}

impl<C: Counter> AllocatorBuilder<C> {
    pub fn new(counter: C) -> Self {
        Self {
            counter,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            utc_offset: None,
            clock: None,
            spawner: None,
        }
    }

    /// Set the prefix prepended to every counter key.
    pub fn key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Set the offset whose midnight ends a daily, monthly or yearly window.
    /// Defaults to the local offset when the allocator is built.
    pub fn utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = Some(utc_offset);
        self
    }

    /// Set the clock cadence windows are read from.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set how background pre-fetches are run. Defaults to one named thread
    /// per pre-fetch.
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Finish building the allocator.
    pub fn finalize(self) -> Allocator<C> {
        Allocator {
            inner: Arc::new(Inner {
                counter: self.counter,
                key_prefix: self.key_prefix,
                utc_offset: self.utc_offset.unwrap_or_else(|| *Local::now().offset()),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                spawner: self.spawner.unwrap_or_else(thread_spawner),
                rules: RwLock::new(HashMap::new()),
                buffers: SegmentBuffer::new(),
                locks: KeyedLocks::default(),
                templates: TemplateCache::new(),
            }),
        }
    }
}

/// A range reserved from the counter.
struct Reserved {
    current: i64,
    max: i64,
    created_on: NaiveDate,
}

struct Inner<C> {
    counter: C,
    key_prefix: String,
    utc_offset: FixedOffset,
    clock: Arc<dyn Clock>,
    spawner: Spawner,
    rules: RwLock<HashMap<String, Arc<Rule>>>,
    buffers: SegmentBuffer,
    locks: KeyedLocks,
    templates: TemplateCache,
}

/// Issues sequential business numbers per rule id.
///
/// Numbers come from locally buffered segments; the shared [`Counter`] is
/// only consulted when both segments of a rule are used up, or in the
/// background when the active one runs low.
///
/// Cloning is cheap and shares all state.
pub struct Allocator<C: Counter> {
    inner: Arc<Inner<C>>,
}

impl<C: Counter> Clone for Allocator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Counter> Allocator<C> {
    /// Create a new Allocator with the default configuration.
    pub fn new(counter: C) -> Self {
        AllocatorBuilder::new(counter).finalize()
    }

    pub fn builder(counter: C) -> AllocatorBuilder<C> {
        AllocatorBuilder::new(counter)
    }

    pub fn counter(&self) -> &C {
        &self.inner.counter
    }

    /// Returns the next number for `rule_id`.
    ///
    /// Fails with [`Error::InvalidRuleId`] for a rule id without a name and
    /// with [`Error::Load`] when the counter cannot be reached.
    ///
    /// If the counter is reset below numbers already handed out, reserved
    /// ranges are dropped, each with a warning, until it passes them again.
    pub fn next_num(&self, rule_id: &str) -> Result<i64, Error> {
        let inner = &self.inner;
        let rule = inner.rule(rule_id)?;
        let buffer = inner.buffers.get_or_create(&rule);

        let value = loop {
            if let Some(value) = buffer.next_id(inner.today()) {
                break value;
            }
            if let Some(value) = inner.reload(&buffer)? {
                break value;
            }
        };

        if rule.preload_enabled() && buffer.begin_preload(inner.today()) {
            self.spawn_preload(buffer);
        }
        Ok(value)
    }

    /// Tokens of the numbering `template` used with `rule_id`.
    pub fn template_tokens(&self, rule_id: &str, template: &str) -> Arc<[Token]> {
        self.inner.templates.tokens(rule_id, template)
    }

    fn spawn_preload(&self, buffer: Arc<DoubleBuffer>) {
        let inner = Arc::clone(&self.inner);
        let task_buffer = Arc::clone(&buffer);
        let spawned = (self.inner.spawner)(Box::new(move || inner.preload(&task_buffer)));
        if let Err(err) = spawned {
            buffer.release_preload();
            tracing::warn!(rule_id = buffer.rule().id(), %err, "could not spawn pre-fetch");
        }
    }
}

impl<C: Counter> Inner<C> {
    fn rule(&self, rule_id: &str) -> Result<Arc<Rule>, Error> {
        if let Some(rule) = self.rules.read().get(rule_id) {
            return Ok(Arc::clone(rule));
        }
        let rule = Arc::new(Rule::parse(rule_id)?);
        Ok(Arc::clone(
            self.rules.write().entry(rule_id.to_owned()).or_insert(rule),
        ))
    }

    fn local_now(&self) -> NaiveDateTime {
        self.clock.now().with_timezone(&self.utc_offset).naive_local()
    }

    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }

    /// Refills an exhausted buffer from the counter, unless another caller
    /// already did while this one waited for the rule's lock.
    fn reload(&self, buffer: &DoubleBuffer) -> Result<Option<i64>, Error> {
        let rule = buffer.rule();
        let _guard = self.locks.lock(rule.id());
        if let Some(value) = buffer.next_id(self.today()) {
            return Ok(Some(value));
        }

        let reserved = self.reserve(rule)?;
        tracing::debug!(rule_id = rule.id(), max = reserved.max, "reloaded segment");
        Ok(buffer.seed(reserved.current, reserved.max, reserved.created_on, self.today()))
    }

    fn preload(&self, buffer: &DoubleBuffer) {
        let rule = buffer.rule();
        match self.reserve(rule) {
            Ok(reserved) => {
                buffer.preload(reserved.current, reserved.max, reserved.created_on, self.today());
            }
            Err(err) => {
                buffer.release_preload();
                tracing::error!(rule_id = rule.id(), %err, "pre-fetch failed");
            }
        }
    }

    /// Takes the next `step` numbers of the rule's current window from the counter.
    fn reserve(&self, rule: &Rule) -> Result<Reserved, Error> {
        let now = self.local_now();
        let today = now.date();
        let key = rule.cache_key(&self.key_prefix, today);

        let max = self
            .counter
            .increment_by(&key, rule.step())
            .map_err(|source| Error::Load {
                rule_id: rule.id().to_owned(),
                source,
            })?;

        // first range of the window: let the key die with it
        if max == rule.step()
            && let Some(ttl) = rule.mode().seconds_until_rollover(now)
            && let Err(err) = self.counter.expire(&key, ttl)
        {
            tracing::warn!(rule_id = rule.id(), %key, %err, "could not set counter ttl");
        }

        Ok(Reserved {
            current: max - rule.step(),
            max,
            created_on: today,
        })
    }
}
