use crate::uapi::v2::LineFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Active {
    #[default]
    High,
    Low,
}

/// Which transitions an event request reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgeDetect {
    #[default]
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    #[cfg(any(test, feature = "mock"))]
    pub(crate) const fn matches(self, rising: bool) -> bool {
        match self {
            EdgeDetect::Both => true,
            EdgeDetect::Rising => rising,
            EdgeDetect::Falling => !rising,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    OpenDrain,
    OpenSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Disabled,
    PullUp,
    PullDown,
}

/// Clock used by the kernel to timestamp edge events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum EventClock {
    /// `CLOCK_MONOTONIC`
    #[default]
    Monotonic,
    HardwareTimestampEngine,
    RealTime,
}

/// Bias, polarity and drive options applied when a line is requested.
///
/// Options that do not apply to the requested mode are passed through and
/// left for the kernel to reject (e.g. a drive mode on an input).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub(crate) active: Active,
    pub(crate) bias: Option<Bias>,
    pub(crate) drive: Option<Drive>,
    pub(crate) clock: EventClock,
}

impl RequestOptions {
    pub const fn new() -> Self {
        Self {
            active: Active::High,
            bias: None,
            drive: None,
            clock: EventClock::Monotonic,
        }
    }

    pub const fn with_active(self, active: Active) -> Self {
        Self { active, ..self }
    }

    pub const fn with_bias(self, bias: Bias) -> Self {
        Self {
            bias: Some(bias),
            ..self
        }
    }

    pub const fn with_drive(self, drive: Drive) -> Self {
        Self {
            drive: Some(drive),
            ..self
        }
    }

    /// Only meaningful for event requests.
    pub const fn with_clock_source(self, clock: EventClock) -> Self {
        Self { clock, ..self }
    }

    pub const fn active(&self) -> Active {
        self.active
    }

    pub const fn bias(&self) -> Option<Bias> {
        self.bias
    }

    pub const fn drive(&self) -> Option<Drive> {
        self.drive
    }

    pub const fn clock(&self) -> EventClock {
        self.clock
    }

    /// Flags shared by every request kind.
    const fn common_v2(self, flags: LineFlags) -> LineFlags {
        let flags = match self.active {
            Active::Low => flags.union(LineFlags::ACTIVE_LOW),
            Active::High => flags,
        };

        let flags = match self.bias {
            Some(Bias::PullDown) => flags.union(LineFlags::BIAS_PULL_DOWN),
            Some(Bias::PullUp) => flags.union(LineFlags::BIAS_PULL_UP),
            Some(Bias::Disabled) => flags.union(LineFlags::BIAS_DISABLED),
            None => flags,
        };

        match self.drive {
            Some(Drive::OpenDrain) => flags.union(LineFlags::OPEN_DRAIN),
            Some(Drive::OpenSource) => flags.union(LineFlags::OPEN_SOURCE),
            None => flags,
        }
    }

    pub(crate) const fn build_v2_io(self, direction: Direction) -> LineFlags {
        let flags = match direction {
            Direction::Input => LineFlags::INPUT,
            Direction::Output => LineFlags::OUTPUT,
        };
        self.common_v2(flags)
    }

    pub(crate) const fn build_v2_event(self, edge: EdgeDetect) -> LineFlags {
        let flags = self.common_v2(LineFlags::INPUT);

        let flags = match edge {
            EdgeDetect::Both => flags
                .union(LineFlags::EDGE_RISING)
                .union(LineFlags::EDGE_FALLING),
            EdgeDetect::Rising => flags.union(LineFlags::EDGE_RISING),
            EdgeDetect::Falling => flags.union(LineFlags::EDGE_FALLING),
        };

        match self.clock {
            EventClock::HardwareTimestampEngine => flags.union(LineFlags::EVENT_CLOCK_HTE),
            EventClock::RealTime => flags.union(LineFlags::EVENT_CLOCK_REALTIME),
            EventClock::Monotonic => flags,
        }
    }
}
