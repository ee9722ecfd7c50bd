//! Raw bindings to the Linux GPIO character-device uAPI.
//!
//! Only the v2 interface is bound; the structs mirror
//! `include/uapi/linux/gpio.h` field for field.

mod common;

pub use common::*;

pub(crate) mod v2;
