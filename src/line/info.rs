use std::io::Result;

use crate::fixed_str::Label;
use crate::uapi::{self, v2::LineFlags};

use super::options::{Active, Direction};

/// Snapshot of a line's kernel-reported metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    name: Label,
    consumer: Label,
    offset: u32,
    flags: LineFlags,
}

impl LineInfo {
    /// Metadata of an unused input line at `offset`.
    pub const fn new(offset: u32) -> Self {
        Self {
            name: Label::empty(),
            consumer: Label::empty(),
            offset,
            flags: LineFlags::INPUT,
        }
    }

    pub const fn with_name(self, name: Label) -> Self {
        Self { name, ..self }
    }

    /// Marks the line used by `consumer`.
    pub const fn with_consumer(self, consumer: Label) -> Self {
        Self {
            consumer,
            flags: self.flags.union(LineFlags::USED),
            ..self
        }
    }

    pub const fn with_direction(self, direction: Direction) -> Self {
        let flags = self
            .flags
            .difference(LineFlags::INPUT.union(LineFlags::OUTPUT));
        let flags = match direction {
            Direction::Input => flags.union(LineFlags::INPUT),
            Direction::Output => flags.union(LineFlags::OUTPUT),
        };
        Self { flags, ..self }
    }

    pub const fn with_active(self, active: Active) -> Self {
        let flags = match active {
            Active::Low => self.flags.union(LineFlags::ACTIVE_LOW),
            Active::High => self.flags.difference(LineFlags::ACTIVE_LOW),
        };
        Self { flags, ..self }
    }

    pub const fn with_open_drain(self) -> Self {
        Self {
            flags: self.flags.union(LineFlags::OPEN_DRAIN),
            ..self
        }
    }

    pub const fn with_open_source(self) -> Self {
        Self {
            flags: self.flags.union(LineFlags::OPEN_SOURCE),
            ..self
        }
    }

    pub(crate) fn from_v2(info: uapi::v2::gpio_line_info) -> Result<Self> {
        Ok(Self {
            name: Label::from_byte_array(info.name)?,
            consumer: Label::from_byte_array(info.consumer)?,
            offset: info.offset,
            flags: info.effective_flags(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }

    pub fn consumer(&self) -> Option<&str> {
        if self.consumer.is_empty() {
            None
        } else {
            Some(&self.consumer)
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Get the direction of this GPIO if configured
    ///
    /// Lines are considered to be inputs if not explicitly
    /// marked as outputs in the line info flags by the kernel.
    pub fn direction(&self) -> Direction {
        if self.flags.contains(LineFlags::OUTPUT) {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    pub fn active_state(&self) -> Active {
        if self.flags.contains(LineFlags::ACTIVE_LOW) {
            Active::Low
        } else {
            Active::High
        }
    }

    /// True if the line is requested by anyone, this process included
    pub fn is_used(&self) -> bool {
        self.flags.contains(LineFlags::USED)
    }

    /// True if this line is marked as open drain in the kernel
    pub fn is_open_drain(&self) -> bool {
        self.flags.contains(LineFlags::OPEN_DRAIN)
    }

    /// True if this line is marked as open source in the kernel
    pub fn is_open_source(&self) -> bool {
        self.flags.contains(LineFlags::OPEN_SOURCE)
    }
}
