// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Distributed unique ID and business number issuance.
//!
//! Two strategies live side by side:
//!
//! - [`Snowflake`]: packs a timestamp, a worker ID, a sequence and an optional
//!   sharding key into a single 64-bit id, entirely in-process.
//! - [`Allocator`]: issues sequential business numbers (invoice numbers and
//!   the like) per rule id from a shared [`Counter`], buffering a contiguous
//!   range locally and pre-fetching the next one in the background.
//!
//! ## Snowflake ids
//!
//! ```
//! use numgen::Snowflake;
//!
//! let sf = Snowflake::builder().worker_id(&|| Ok(7)).finalize().unwrap();
//! let id = sf.next_id().unwrap();
//! assert_eq!(sf.decompose(id).worker_id, 7);
//! ```
//!
//! Snowflake is thread safe. `clone` it before moving to another thread:
//! ```
//! use numgen::Snowflake;
//! use std::thread;
//!
//! let sf = Snowflake::builder().worker_id(&|| Ok(1)).finalize().unwrap();
//!
//! let mut children = Vec::new();
//! for _ in 0..10 {
//!     let thread_sf = sf.clone();
//!     children.push(thread::spawn(move || {
//!         println!("{}", thread_sf.next_id().unwrap());
//!     }));
//! }
//!
//! for child in children {
//!     child.join().unwrap();
//! }
//! ```
//!
//! ## Business numbers
//!
//! Rule ids read `name#mode#step#loadFactor`: `INV#D#500#0.2` restarts every
//! day, reserves 500 numbers per counter call and starts fetching the next
//! 500 once 100 are left.
//!
//! ```
//! use numgen::{Allocator, MemoryCounter};
//!
//! let allocator = Allocator::new(MemoryCounter::new());
//! assert_eq!(allocator.next_num("INV#D#500#0.2").unwrap(), 1);
//! assert_eq!(allocator.next_num("INV#D#500#0.2").unwrap(), 2);
//! ```

mod allocator;
mod buffer;
mod builder;
mod clock;
mod counter;
mod error;
mod lock;
mod rule;
mod segment;
mod snowflake;
mod template;
#[cfg(test)]
mod tests;

pub use crate::snowflake::*;
pub use allocator::*;
pub use buffer::*;
pub use builder::*;
pub use clock::*;
pub use counter::*;
pub use error::*;
pub use lock::*;
pub use rule::*;
pub use segment::*;
pub use template::*;
