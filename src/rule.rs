// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rule ids of the form `name#mode#step#loadFactor`.
//!
//! Every section after the name is optional and parsed positionally. Parsing
//! the numeric sections never fails: a missing or malformed fragment falls
//! back to its default and an out-of-range one is clamped, with a warning.

use crate::error::Error;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

/// Smallest range fetched per counter call. Rules at this step do not pre-fetch.
pub const STEP_MIN: i64 = 1;
/// Largest range fetched per counter call.
pub const STEP_MAX: i64 = 100_000;
/// Step used when the rule id has none.
pub const DEFAULT_STEP: i64 = STEP_MIN;
/// Load factor used when the rule id has none.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.2;

const SEPARATOR: char = '#';

/// The cadence after which a rule's counter starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    None,
    Daily,
    Monthly,
    Yearly,
}

impl Mode {
    /// Suffix naming the cadence window `date` falls in, if the mode has one.
    pub fn window(&self, date: NaiveDate) -> Option<String> {
        let format = match self {
            Mode::None => return None,
            Mode::Daily => "%Y%m%d",
            Mode::Monthly => "%Y%m",
            Mode::Yearly => "%Y",
        };
        Some(date.format(format).to_string())
    }

    /// Whether two dates fall in the same cadence window.
    pub fn same_window(&self, a: NaiveDate, b: NaiveDate) -> bool {
        match self {
            Mode::None => true,
            Mode::Daily => a == b,
            Mode::Monthly => a.year() == b.year() && a.month() == b.month(),
            Mode::Yearly => a.year() == b.year(),
        }
    }

    /// Seconds from `now` until the current cadence window ends, at least 1.
    pub fn seconds_until_rollover(&self, now: NaiveDateTime) -> Option<i64> {
        let today = now.date();
        let next = match self {
            Mode::None => return None,
            Mode::Daily => today.succ_opt()?,
            Mode::Monthly => today.with_day(1)?.checked_add_months(Months::new(1))?,
            Mode::Yearly => NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
        };
        let seconds = (next.and_hms_opt(0, 0, 0)? - now).num_seconds();
        Some(seconds.max(1))
    }
}

/// Allocation parameters derived from a rule id.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    id: String,
    mode: Mode,
    step: i64,
    load_factor: f64,
}

impl Rule {
    /// Parses `rule_id`. Only an empty name is rejected.
    pub fn parse(rule_id: &str) -> Result<Self, Error> {
        let name = rule_id.split(SEPARATOR).next().unwrap_or_default();
        if name.trim().is_empty() {
            return Err(Error::InvalidRuleId(rule_id.to_owned()));
        }
        Ok(Self {
            id: rule_id.to_owned(),
            mode: parse_mode(rule_id),
            step: parse_step(rule_id),
            load_factor: parse_load_factor(rule_id),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// Remaining count at or below which the next segment is pre-fetched.
    pub fn preload_threshold(&self) -> f64 {
        self.step as f64 * self.load_factor
    }

    /// Whether the rule fetches the next segment in the background.
    pub fn preload_enabled(&self) -> bool {
        self.step > STEP_MIN
    }

    /// The counter key for the cadence window `today` falls in.
    pub fn cache_key(&self, prefix: &str, today: NaiveDate) -> String {
        match self.mode.window(today) {
            Some(window) => format!("{prefix}{}:{window}", self.id),
            None => format!("{prefix}{}", self.id),
        }
    }
}

fn fragment(rule_id: &str, index: usize) -> Option<&str> {
    rule_id
        .split(SEPARATOR)
        .nth(index)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Reset cadence of `rule_id`: `D`, `M` or `Y`, case-insensitive.
pub fn parse_mode(rule_id: &str) -> Mode {
    match fragment(rule_id, 1) {
        Some(m) if m.eq_ignore_ascii_case("D") => Mode::Daily,
        Some(m) if m.eq_ignore_ascii_case("M") => Mode::Monthly,
        Some(m) if m.eq_ignore_ascii_case("Y") => Mode::Yearly,
        _ => Mode::None,
    }
}

/// Step of `rule_id`, clamped to `[STEP_MIN, STEP_MAX]`.
pub fn parse_step(rule_id: &str) -> i64 {
    let Some(raw) = fragment(rule_id, 2) else {
        return DEFAULT_STEP;
    };
    match raw.parse::<i64>() {
        Ok(step) if step < STEP_MIN || step > STEP_MAX => {
            let clamped = step.clamp(STEP_MIN, STEP_MAX);
            tracing::warn!(rule_id, step, clamped, "step out of range, clamping");
            clamped
        }
        Ok(step) => step,
        Err(err) => {
            tracing::warn!(rule_id, raw, %err, default = DEFAULT_STEP, "unparseable step, using default");
            DEFAULT_STEP
        }
    }
}

/// Load factor of `rule_id`, within `(0, 1]`.
pub fn parse_load_factor(rule_id: &str) -> f64 {
    let Some(raw) = fragment(rule_id, 3) else {
        return DEFAULT_LOAD_FACTOR;
    };
    match raw.parse::<f64>() {
        Ok(factor) if factor > 1.0 => {
            tracing::warn!(rule_id, factor, "load factor above 1, clamping");
            1.0
        }
        Ok(factor) if factor > 0.0 => factor,
        Ok(factor) => {
            tracing::warn!(rule_id, factor, default = DEFAULT_LOAD_FACTOR, "load factor not positive, using default");
            DEFAULT_LOAD_FACTOR
        }
        Err(err) => {
            tracing::warn!(rule_id, raw, %err, default = DEFAULT_LOAD_FACTOR, "unparseable load factor, using default");
            DEFAULT_LOAD_FACTOR
        }
    }
}
