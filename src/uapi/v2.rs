// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use core::mem::MaybeUninit;

use bitflags::bitflags;
use nix::ioctl_readwrite;

pub const GPIO_LINES_MAX: usize = 64;
pub const GPIO_MAX_NAME_SIZE: usize = 32;
pub const GPIO_LINE_NUM_ATTRS_MAX: usize = 10;

bitflags! {
    /// Line flags, both requested and reported.
    ///
    /// Maps to kernel [`GPIO_V2_LINE_FLAG_*`] flags.
    ///
    /// [`GPIO_V2_LINE_FLAG_*`]: https://github.com/torvalds/linux/blob/v5.19/include/uapi/linux/gpio.h
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct LineFlags: u64 {
        const USED = (1 << 0);
        const ACTIVE_LOW = (1 << 1);
        const INPUT = (1 << 2);
        const OUTPUT = (1 << 3);
        const EDGE_RISING = (1 << 4);
        const EDGE_FALLING = (1 << 5);
        const OPEN_DRAIN = (1 << 6);
        const OPEN_SOURCE = (1 << 7);
        const BIAS_PULL_UP = (1 << 8);
        const BIAS_PULL_DOWN = (1 << 9);
        const BIAS_DISABLED = (1 << 10);
        const EVENT_CLOCK_REALTIME = (1 << 11);
        const EVENT_CLOCK_HTE = (1 << 12);
    }
}

/// `GPIO_V2_LINE_ATTR_ID_*`
pub(crate) const ATTR_ID_FLAGS: u32 = 1;
pub(crate) const ATTR_ID_OUTPUT_VALUES: u32 = 2;
pub(crate) const ATTR_ID_DEBOUNCE: u32 = 3;

pub(crate) const EVENT_SIZE: usize = std::mem::size_of::<gpio_line_event>();

/// `GPIO_V2_LINE_EVENT_*`
pub const EVENT_RISING_EDGE: u32 = 1;
pub const EVENT_FALLING_EDGE: u32 = 2;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_values {
    pub(crate) bits: u64,
    pub(crate) mask: u64,
}

/// a configurable attribute of a line
#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_attribute {
    /// attribute identifier, one of `ATTR_ID_*`
    pub(crate) id: u32,
    /// reserved for future use and must be zero filled
    pub(crate) _padding: u32,
    /// A tagged union when combined with `id`
    pub(crate) attribute: gpio_line_attribute_union,
}

impl core::fmt::Debug for gpio_line_attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = unsafe {
            match self.id {
                ATTR_ID_FLAGS => &self.attribute.flags as &dyn core::fmt::Debug,
                ATTR_ID_OUTPUT_VALUES => &self.attribute.values as &dyn core::fmt::Debug,
                ATTR_ID_DEBOUNCE => &self.attribute.debounce_period as &dyn core::fmt::Debug,
                _ => &"unknown line attribute" as &dyn core::fmt::Debug,
            }
        };
        f.debug_struct("gpio_line_attribute")
            .field("id", &self.id)
            .field("attribute", value)
            .finish()
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) union gpio_line_attribute_union {
    /// overrides the request-wide flags for the lines in the attribute mask
    pub(crate) flags: LineFlags,
    /// bitmap of output values, one bit per index into the request offsets
    pub(crate) values: u64,
    /// debounce period, in microseconds
    pub(crate) debounce_period: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_config_attribute {
    pub(crate) attr: gpio_line_attribute,
    pub(crate) mask: u64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_config {
    pub(crate) flags: LineFlags,
    pub(crate) num_attrs: u32,
    _padding: [u32; 5],
    pub(crate) attrs: [MaybeUninit<gpio_line_config_attribute>; GPIO_LINE_NUM_ATTRS_MAX],
}

impl gpio_line_config {
    pub const fn zeroed() -> Self {
        Self {
            flags: LineFlags::empty(),
            num_attrs: 0,
            _padding: [0; 5],
            attrs: [MaybeUninit::zeroed(); GPIO_LINE_NUM_ATTRS_MAX],
        }
    }

    /// Append an attribute applying to the lines selected by `mask`.
    ///
    /// Returns `false` when the attribute table is already full.
    pub(crate) fn push_attr(&mut self, attr: gpio_line_attribute, mask: u64) -> bool {
        let idx = self.num_attrs as usize;
        let Some(slot) = self.attrs.get_mut(idx) else {
            return false;
        };
        slot.write(gpio_line_config_attribute { attr, mask });
        self.num_attrs += 1;
        true
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_request {
    pub(crate) offsets: [u32; GPIO_LINES_MAX],
    pub(crate) consumer: [u8; GPIO_MAX_NAME_SIZE],
    pub(crate) config: gpio_line_config,
    pub(crate) num_lines: u32,
    pub(crate) event_buffer_size: u32,
    _padding: [u32; 5],
    pub(crate) fd: std::os::fd::RawFd,
}

impl gpio_line_request {
    pub const fn zeroed() -> Self {
        Self {
            offsets: [0; GPIO_LINES_MAX],
            consumer: [0; GPIO_MAX_NAME_SIZE],
            config: gpio_line_config::zeroed(),
            num_lines: 0,
            event_buffer_size: 0,
            _padding: [0; 5],
            fd: -1,
        }
    }

    /// A request for exactly one line.
    pub(crate) fn single(
        offset: u32,
        consumer: [u8; GPIO_MAX_NAME_SIZE],
        flags: LineFlags,
    ) -> Self {
        let mut req = Self::zeroed();
        req.offsets[0] = offset;
        req.num_lines = 1;
        req.consumer = consumer;
        req.config.flags = flags;
        req
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_info {
    pub(crate) name: [u8; GPIO_MAX_NAME_SIZE],
    pub(crate) consumer: [u8; GPIO_MAX_NAME_SIZE],
    pub(crate) offset: u32,
    pub(crate) num_attrs: u32,
    pub(crate) flags: LineFlags,
    pub(crate) attrs: [MaybeUninit<gpio_line_attribute>; GPIO_LINE_NUM_ATTRS_MAX],
    pub(crate) _padding: [u32; 4],
}

impl gpio_line_info {
    /// A zeroed info block asking for `offset`; the kernel requires the
    /// remaining fields to be zero.
    pub const fn for_offset(offset: u32) -> Self {
        Self {
            name: [0; GPIO_MAX_NAME_SIZE],
            consumer: [0; GPIO_MAX_NAME_SIZE],
            offset,
            num_attrs: 0,
            flags: LineFlags::empty(),
            attrs: [MaybeUninit::zeroed(); GPIO_LINE_NUM_ATTRS_MAX],
            _padding: [0; 4],
        }
    }

    /// Flags with any per-line `FLAGS` attribute folded in.
    pub(crate) fn effective_flags(&self) -> LineFlags {
        self.attrs
            .iter()
            .take(self.num_attrs as usize)
            .map(|a| unsafe { a.assume_init() })
            .filter(|a| a.id == ATTR_ID_FLAGS)
            .fold(self.flags, |acc, a| acc.union(unsafe { a.attribute.flags }))
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_event {
    pub(crate) timestamp_ns: u64,
    pub(crate) id: u32,
    pub(crate) offset: u32,
    pub(crate) seqno: u32,
    pub(crate) line_seqno: u32,
    /* Space reserved for future use. */
    _padding: [u32; 6],
}

impl gpio_line_event {
    /// # Safety:
    ///
    /// Caller must ensure that the bytes were produced by the kernel for
    /// this struct.
    pub const unsafe fn from_bytes(bytes: [u8; EVENT_SIZE]) -> Self {
        let buf_ptr = (&bytes as *const _) as *const Self;
        unsafe { std::ptr::read_unaligned(buf_ptr) }
    }
}

ioctl_readwrite!(gpio_get_line, 0xB4, 0x07, gpio_line_request);

ioctl_readwrite!(gpio_get_line_info, 0xB4, 0x05, gpio_line_info);

ioctl_readwrite!(gpio_line_get_values, 0xB4, 0x0E, gpio_line_values);
ioctl_readwrite!(gpio_line_set_values, 0xB4, 0x0F, gpio_line_values);

#[cfg(test)]
mod test {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn struct_sizes_match_kernel_abi() {
        assert_eq!(size_of::<crate::uapi::gpio_chip_info>(), 68);
        assert_eq!(size_of::<gpio_line_values>(), 16);
        assert_eq!(size_of::<gpio_line_attribute>(), 16);
        assert_eq!(size_of::<gpio_line_config_attribute>(), 24);
        assert_eq!(size_of::<gpio_line_config>(), 272);
        assert_eq!(size_of::<gpio_line_request>(), 592);
        assert_eq!(size_of::<gpio_line_info>(), 256);
        assert_eq!(size_of::<gpio_line_event>(), 48);
    }

    #[test]
    fn config_attribute_table_is_bounded() {
        let mut config = gpio_line_config::zeroed();
        let attr = gpio_line_attribute {
            id: ATTR_ID_OUTPUT_VALUES,
            _padding: 0,
            attribute: gpio_line_attribute_union { values: 1 },
        };

        for _ in 0..GPIO_LINE_NUM_ATTRS_MAX {
            assert!(config.push_attr(attr, 1));
        }
        assert!(!config.push_attr(attr, 1));
        assert_eq!(config.num_attrs as usize, GPIO_LINE_NUM_ATTRS_MAX);
    }

    #[test]
    fn event_is_read_from_raw_bytes() {
        let mut raw = [0u8; EVENT_SIZE];
        raw[..8].copy_from_slice(&1_500_000_000u64.to_ne_bytes());
        raw[8..12].copy_from_slice(&EVENT_FALLING_EDGE.to_ne_bytes());
        raw[12..16].copy_from_slice(&20u32.to_ne_bytes());

        let event = unsafe { gpio_line_event::from_bytes(raw) };
        assert_eq!(event.timestamp_ns, 1_500_000_000);
        assert_eq!(event.id, EVENT_FALLING_EDGE);
        assert_eq!(event.offset, 20);
    }
}
