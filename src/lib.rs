// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `gpio-lines` crate gives scoped, exclusive access to individual lines
//! of the Linux [GPIO character
//! device](https://www.kernel.org/doc/Documentation/ABI/testing/gpio-cdev),
//! and turns edge-event lines into async streams.
//!
//! A [`Chip`] is opened by number or label. Lines taken from it are first
//! configured, with [`Line::open`] for input/output or [`Line::monitor`] for
//! edge events, and then acquired. The [`LineGuard`] returned by
//! [`Line::acquire`] holds the kernel request and releases it when dropped,
//! so requests and releases always pair up even when something fails half
//! way.
//!
//! # Examples
//!
//! Mirror one line onto another whenever it changes:
//!
//! ```no_run
//! use gpio_lines::{
//!     options::{Direction, EdgeDetect, RequestOptions},
//!     CdevBackend, Chip, ChipConfig, LineValue,
//! };
//!
//! # async fn mirror() -> Result<(), gpio_lines::Error> {
//! let chip = Chip::open(CdevBackend::new(), ChipConfig::new(0, "mirror")?)?;
//!
//! let output = chip.line(19);
//! let output = output
//!     .open(Direction::Output, LineValue::Inactive, RequestOptions::new())?
//!     .acquire()?;
//!
//! let input = chip.line(20);
//! let input = input
//!     .monitor(EdgeDetect::Both, RequestOptions::new())?
//!     .acquire()?;
//!
//! let mut events = input.events()?;
//! loop {
//!     let event = events.next_event().await?;
//!     println!("{event}");
//!     output.set_value(event.value())?;
//! }
//! # }
//! ```
//!
//! The native side sits behind the [`Backend`] trait. [`CdevBackend`] talks
//! to `/dev/gpiochipN`; with the `mock` feature, `native::mock::MockBackend`
//! simulates chips in-process for tests.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod errors;

pub mod fixed_str;

#[allow(non_camel_case_types)]
pub mod uapi;

pub mod chip;

pub mod line;

pub mod mockup;

pub mod native;

pub use chip::{Chip, ChipConfig, ChipSelector};
pub use errors::{Error, ErrorKind, Result};
pub use line::{
    options, Edge, Event, Line, LineEvents, LineGuard, LineInfo, LineState, LineValue, Mode,
    Timestamp,
};
pub use native::{Backend, CdevBackend, RawEvent};
