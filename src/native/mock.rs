//! In-process [`Backend`] simulating GPIO chips.
//!
//! Pins carry a physical level that can be driven from the outside with
//! [`MockBackend::drive`] or wired to an output pin with
//! [`MockBackend::link`]. Event requests get one end of a `UnixDatagram`
//! pair as their descriptor, so readiness works exactly like a kernel event
//! fd. Requests follow kernel exclusivity: a second request for a pin that
//! is already requested fails with `EBUSY`.

use std::{
    io::{self, Result},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixDatagram,
    },
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{read_record, Backend, RawEvent};
use crate::{
    fixed_str::Label,
    line::{
        options::{Active, Direction, Drive, EdgeDetect, RequestOptions},
        LineInfo, LineValue, Timestamp,
    },
    uapi::v2::{EVENT_FALLING_EDGE, EVENT_RISING_EDGE},
};

const RECORD_SIZE: usize = 16;

fn encode(event: RawEvent) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[..4].copy_from_slice(&event.edge.to_le_bytes());
    buf[4..12].copy_from_slice(&event.seconds.to_le_bytes());
    buf[12..].copy_from_slice(&event.nanoseconds.to_le_bytes());
    buf
}

/// Queue one record on an event descriptor. A full queue drops the event,
/// as the kernel does when its event FIFO overflows.
fn queue(tx: &UnixDatagram, event: RawEvent) -> Result<()> {
    match tx.send(&encode(event)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            log::debug!("Event FIFO full, dropping {event:?}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn decode(buf: [u8; RECORD_SIZE]) -> RawEvent {
    let mut edge = [0u8; 4];
    let mut seconds = [0u8; 8];
    let mut nanoseconds = [0u8; 4];
    edge.copy_from_slice(&buf[..4]);
    seconds.copy_from_slice(&buf[4..12]);
    nanoseconds.copy_from_slice(&buf[12..]);
    RawEvent::new(
        u32::from_le_bytes(edge),
        u64::from_le_bytes(seconds),
        u32::from_le_bytes(nanoseconds),
    )
}

/// Native call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Successful line requests
    pub requests: usize,
    /// Release calls, including ones that reported failure
    pub releases: usize,
    pub chip_opens: usize,
    pub chip_closes: usize,
}

#[derive(Debug)]
enum Kind {
    Input,
    Output(LineValue),
    Event {
        edge: EdgeDetect,
        tx: UnixDatagram,
    },
}

#[derive(Debug)]
struct Request {
    token: u64,
    consumer: Label,
    options: RequestOptions,
    kind: Kind,
}

impl Request {
    fn active_low(&self) -> bool {
        self.options.active() == Active::Low
    }
}

#[derive(Debug, Default)]
struct Pin {
    name: Label,
    /// Physical level
    high: bool,
    request: Option<Request>,
}

#[derive(Debug)]
struct ChipState {
    number: u32,
    label: String,
    pins: Vec<Pin>,
}

#[derive(Debug, Default)]
struct MockState {
    chips: Vec<ChipState>,
    links: Vec<(u32, u32, u32)>,
    next_token: u64,
    fail_next_request: Option<i32>,
    fail_next_read: Option<i32>,
    fail_next_event_fd: Option<i32>,
    fail_releases: bool,
    last_event: Timestamp,
    stats: MockStats,
}

impl MockState {
    fn chip(&self, number: u32) -> Result<&ChipState> {
        self.chips
            .iter()
            .find(|c| c.number == number)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn pin(&self, chip: u32, offset: u32) -> Result<&Pin> {
        self.chip(chip)?
            .pins
            .get(offset as usize)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn pin_mut(&mut self, chip: u32, offset: u32) -> Result<&mut Pin> {
        self.chips
            .iter_mut()
            .find(|c| c.number == chip)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?
            .pins
            .get_mut(offset as usize)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }

    /// The request on `line`, provided it is still the one `line` made.
    fn request(&self, line: &MockLine) -> Result<&Request> {
        let pin = self.pin(line.chip, line.offset)?;
        match (&pin.request, line.token) {
            (Some(req), Some(token)) if req.token == token => Ok(req),
            _ => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    fn stamp(&mut self) -> Result<Timestamp> {
        let ts = Timestamp::now()?.next_after(self.last_event);
        self.last_event = ts;
        Ok(ts)
    }

    /// Change the physical level of a pin, emitting an edge event if an
    /// event request is watching for that transition.
    fn set_level(&mut self, chip: u32, offset: u32, high: bool) -> Result<()> {
        let pin = self.pin(chip, offset)?;
        if pin.high == high {
            return Ok(());
        }

        let watched = matches!(
            pin.request,
            Some(Request {
                kind: Kind::Event { .. },
                ..
            })
        );
        let ts = if watched { Some(self.stamp()?) } else { None };

        let pin = self.pin_mut(chip, offset)?;
        pin.high = high;

        if let (Some(ts), Some(req)) = (ts, &pin.request) {
            if let Kind::Event { edge, tx } = &req.kind {
                let rising = high != req.active_low();
                if edge.matches(rising) {
                    let tag = if rising {
                        EVENT_RISING_EDGE
                    } else {
                        EVENT_FALLING_EDGE
                    };
                    queue(tx, RawEvent::new(tag, ts.secs(), ts.subsec_nanos()))?;
                }
            }
        }

        Ok(())
    }

    fn propagate(&mut self, chip: u32, output: u32, high: bool) -> Result<()> {
        let targets: Vec<u32> = self
            .links
            .iter()
            .filter(|(c, out, _)| *c == chip && *out == output)
            .map(|(_, _, input)| *input)
            .collect();

        for input in targets {
            self.set_level(chip, input, high)?;
        }
        Ok(())
    }
}

/// Shared-state fake GPIO backend. Clones observe and control the same
/// simulated chips.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chip with `lines` unnamed pins, all physically low.
    pub fn with_chip(self, number: u32, label: &str, lines: u32) -> Self {
        self.lock().chips.push(ChipState {
            number,
            label: label.to_owned(),
            pins: (0..lines).map(|_| Pin::default()).collect(),
        });
        self
    }

    /// Give a pin a kernel line name.
    pub fn with_line_name(self, chip: u32, offset: u32, name: &str) -> Self {
        if let (Ok(label), Ok(pin)) = (Label::new(name), self.lock().pin_mut(chip, offset)) {
            pin.name = label;
        }
        self
    }

    /// Wire `output` to `input` on the same chip: whatever level the
    /// output drives shows up on the input.
    pub fn link(&self, chip: u32, output: u32, input: u32) {
        self.lock().links.push((chip, output, input));
    }

    /// Drive the physical level of a pin from outside, as a button or
    /// another device would.
    pub fn drive(&self, chip: u32, offset: u32, high: bool) -> Result<()> {
        self.lock().set_level(chip, offset, high)
    }

    /// Physical level of a pin.
    pub fn level(&self, chip: u32, offset: u32) -> Result<bool> {
        Ok(self.lock().pin(chip, offset)?.high)
    }

    /// Queue an arbitrary record on an event request, bypassing the edge
    /// filter.
    pub fn inject_event(&self, chip: u32, offset: u32, event: RawEvent) -> Result<()> {
        let state = self.lock();
        match &state.pin(chip, offset)?.request {
            Some(Request {
                kind: Kind::Event { tx, .. },
                ..
            }) => queue(tx, event),
            _ => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    /// Make the next line request fail with `errno`.
    pub fn fail_next_request(&self, errno: i32) {
        self.lock().fail_next_request = Some(errno);
    }

    /// Make the next event read fail with `errno`. The pending event stays
    /// queued.
    pub fn fail_next_read(&self, errno: i32) {
        self.lock().fail_next_read = Some(errno);
    }

    /// Make the next lookup of an event descriptor fail with `errno`.
    pub fn fail_next_event_fd(&self, errno: i32) {
        self.lock().fail_next_event_fd = Some(errno);
    }

    /// Make releases report `EIO`. The pin is freed regardless.
    pub fn fail_releases(&self, fail: bool) {
        self.lock().fail_releases = fail;
    }

    pub fn is_requested(&self, chip: u32, offset: u32) -> bool {
        self.lock()
            .pin(chip, offset)
            .map(|p| p.request.is_some())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(
        &self,
        line: &mut MockLine,
        consumer: &str,
        options: RequestOptions,
        kind: Kind,
    ) -> Result<()> {
        let consumer = Label::new(consumer)?;
        let mut state = self.lock();

        if let Some(errno) = state.fail_next_request.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if line.token.is_some() || state.pin(line.chip, line.offset)?.request.is_some() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }

        state.next_token += 1;
        let token = state.next_token;
        let output = match &kind {
            Kind::Output(default) => Some(default.is_active() != (options.active() == Active::Low)),
            _ => None,
        };

        state.pin_mut(line.chip, line.offset)?.request = Some(Request {
            token,
            consumer,
            options,
            kind,
        });
        state.stats.requests += 1;
        line.token = Some(token);

        if let Some(high) = output {
            state.pin_mut(line.chip, line.offset)?.high = high;
            state.propagate(line.chip, line.offset, high)?;
        }
        Ok(())
    }
}

/// Handle of a chip opened on a [`MockBackend`].
#[derive(Debug)]
pub struct MockChip {
    number: u32,
}

/// Handle of a line on a [`MockBackend`].
#[derive(Debug)]
pub struct MockLine {
    chip: u32,
    offset: u32,
    token: Option<u64>,
    events: Option<UnixDatagram>,
}

impl Backend for MockBackend {
    type Chip = MockChip;
    type Line = MockLine;

    fn chip_open_by_number(&self, number: u32) -> Result<MockChip> {
        let mut state = self.lock();
        let number = state.chip(number)?.number;
        state.stats.chip_opens += 1;
        Ok(MockChip { number })
    }

    fn chip_open_by_label(&self, label: &str) -> Result<MockChip> {
        let mut state = self.lock();
        let number = state
            .chips
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.number)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        state.stats.chip_opens += 1;
        Ok(MockChip { number })
    }

    fn chip_close(&self, _chip: MockChip) {
        self.lock().stats.chip_closes += 1;
    }

    fn chip_get_line(&self, chip: &MockChip, offset: u32) -> Result<MockLine> {
        let _ = self.lock().pin(chip.number, offset)?;
        Ok(MockLine {
            chip: chip.number,
            offset,
            token: None,
            events: None,
        })
    }

    fn line_request_input(
        &self,
        line: &mut MockLine,
        consumer: &str,
        options: RequestOptions,
    ) -> Result<()> {
        self.request(line, consumer, options, Kind::Input)
    }

    fn line_request_output(
        &self,
        line: &mut MockLine,
        consumer: &str,
        options: RequestOptions,
        default: LineValue,
    ) -> Result<()> {
        self.request(line, consumer, options, Kind::Output(default))
    }

    fn line_request_event(
        &self,
        line: &mut MockLine,
        consumer: &str,
        edge: EdgeDetect,
        options: RequestOptions,
    ) -> Result<()> {
        let (tx, rx) = UnixDatagram::pair()?;
        tx.set_nonblocking(true)?;
        rx.set_nonblocking(true)?;
        self.request(line, consumer, options, Kind::Event { edge, tx })?;
        line.events = Some(rx);
        Ok(())
    }

    fn line_release(&self, line: MockLine) -> Result<()> {
        let mut state = self.lock();
        state.stats.releases += 1;

        let pin = state.pin_mut(line.chip, line.offset)?;
        match (&pin.request, line.token) {
            (Some(req), Some(token)) if req.token == token => pin.request = None,
            _ => return Err(io::Error::from_raw_os_error(libc::EBADF)),
        }

        if state.fail_releases {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(())
    }

    fn line_get_value(&self, line: &MockLine) -> Result<LineValue> {
        let state = self.lock();
        let req = state.request(line)?;
        match req.kind {
            Kind::Output(value) => Ok(value),
            _ => {
                let high = state.pin(line.chip, line.offset)?.high;
                Ok(LineValue::new(high != req.active_low()))
            }
        }
    }

    fn line_set_value(&self, line: &MockLine, value: LineValue) -> Result<()> {
        let mut state = self.lock();
        let high = {
            let req = state.request(line)?;
            if !matches!(req.kind, Kind::Output(_)) {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            value.is_active() != req.active_low()
        };

        let pin = state.pin_mut(line.chip, line.offset)?;
        pin.high = high;
        if let Some(req) = pin.request.as_mut() {
            req.kind = Kind::Output(value);
        }
        state.propagate(line.chip, line.offset, high)
    }

    fn line_event_get_fd(&self, line: &MockLine) -> Result<RawFd> {
        let mut state = self.lock();
        if let Some(errno) = state.fail_next_event_fd.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let _ = state.request(line)?;
        line.events
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn line_event_read_fd(&self, fd: RawFd) -> Result<RawEvent> {
        if let Some(errno) = self.lock().fail_next_read.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        read_record::<RECORD_SIZE>(fd).map(decode)
    }

    fn line_info(&self, line: &MockLine) -> Result<LineInfo> {
        let state = self.lock();
        let pin = state.pin(line.chip, line.offset)?;
        let info = LineInfo::new(line.offset).with_name(pin.name);

        let Some(req) = &pin.request else {
            return Ok(info);
        };

        let direction = match req.kind {
            Kind::Output(_) => Direction::Output,
            _ => Direction::Input,
        };
        let info = info
            .with_consumer(req.consumer)
            .with_direction(direction)
            .with_active(req.options.active());

        Ok(match req.options.drive() {
            Some(Drive::OpenDrain) => info.with_open_drain(),
            Some(Drive::OpenSource) => info.with_open_source(),
            None => info,
        })
    }
}
