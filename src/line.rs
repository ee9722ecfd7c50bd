//! The line lifecycle.
//!
//! A [`Line`] moves through a fixed set of states:
//!
//! ```text
//! Free -> Configuring(Io)    -> Active(Io)    -> Free
//! Free -> Configuring(Event) -> Active(Event) -> Free
//! ```
//!
//! [`Line::open`] and [`Line::monitor`] only record the configuration.
//! [`Line::acquire`] issues the native request and returns a [`LineGuard`];
//! dropping the guard releases the line again. Nothing else changes the
//! state.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use futures::task::AtomicWaker;
use tokio::io::unix::AsyncFd;

use crate::{
    chip::Chip,
    errors::{Error, ErrorKind, Result},
    fixed_str::Label,
    native::Backend,
};

mod event;
mod info;
pub mod options;
mod stream;
mod values;

pub use event::{Edge, Event, Timestamp};
pub use info::LineInfo;
pub use stream::LineEvents;
pub use values::LineValue;

use options::{Active, Direction, EdgeDetect, RequestOptions};

/// What a line is configured or acquired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Plain input or output
    Io,
    /// Edge event monitoring
    Event,
}

/// Observable lifecycle state of a [`Line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineState {
    Free,
    Configuring(Mode),
    Active(Mode),
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineState::Free => "free",
            LineState::Configuring(Mode::Io) => "configuring-io",
            LineState::Configuring(Mode::Event) => "configuring-event",
            LineState::Active(Mode::Io) => "active-io",
            LineState::Active(Mode::Event) => "active-event",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Config {
    Io {
        direction: Direction,
        default: LineValue,
        options: RequestOptions,
    },
    Event {
        edge: EdgeDetect,
        options: RequestOptions,
    },
}

impl Config {
    const fn mode(&self) -> Mode {
        match self {
            Config::Io { .. } => Mode::Io,
            Config::Event { .. } => Mode::Event,
        }
    }

    const fn direction(&self) -> Direction {
        match self {
            Config::Io { direction, .. } => *direction,
            Config::Event { .. } => Direction::Input,
        }
    }
}

struct Acquired<L> {
    handle: L,
    config: Config,
    generation: u64,
    /// Readiness registration of the event descriptor, set up by the first
    /// stream step.
    events: Option<AsyncFd<std::os::fd::RawFd>>,
}

enum State<L> {
    /// Carries the configuration of the previous acquisition, if any.
    Free(Option<Config>),
    Configuring(Config),
    Active(Acquired<L>),
}

impl<L> State<L> {
    fn view(&self) -> LineState {
        match self {
            State::Free(_) => LineState::Free,
            State::Configuring(config) => LineState::Configuring(config.mode()),
            State::Active(acq) => LineState::Active(acq.config.mode()),
        }
    }

    fn config(&self) -> Option<&Config> {
        match self {
            State::Free(last) => last.as_ref(),
            State::Configuring(config) => Some(config),
            State::Active(acq) => Some(&acq.config),
        }
    }
}

/// One GPIO line of a [`Chip`].
///
/// All methods take `&self`; the state lives behind a lock so the same line
/// can be shared between tasks, for example one consuming
/// [`events`](Line::events) while another decides when to release it.
pub struct Line<'c, B: Backend> {
    chip: &'c Chip<B>,
    offset: u32,
    consumer: Label,
    state: Mutex<State<B::Line>>,
    generations: AtomicU64,
    waker: AtomicWaker,
}

impl<'c, B: Backend> Line<'c, B> {
    pub(crate) fn new(chip: &'c Chip<B>, offset: u32, consumer: Label) -> Self {
        Self {
            chip,
            offset,
            consumer,
            state: Mutex::new(State::Free(None)),
            generations: AtomicU64::new(0),
            waker: AtomicWaker::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<B::Line>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LineState {
        self.lock().view()
    }

    pub fn chip(&self) -> &'c Chip<B> {
        self.chip
    }

    fn configure(&self, config: Config, operation: &'static str) -> Result<&Self> {
        let mut state = self.lock();
        match &*state {
            State::Free(_) => {}
            State::Configuring(current) if current.mode() == config.mode() => {}
            other => return Err(Error::state(self.offset, other.view(), operation)),
        }
        *state = State::Configuring(config);
        Ok(self)
    }

    /// Configure the line for input or output.
    ///
    /// `default` is the initial value of an output. Fails with
    /// [`ErrorKind::State`] unless the line is free or already configured
    /// for I/O.
    pub fn open(
        &self,
        direction: Direction,
        default: LineValue,
        options: RequestOptions,
    ) -> Result<&Self> {
        self.configure(
            Config::Io {
                direction,
                default,
                options,
            },
            "open",
        )
    }

    /// Configure the line for edge events.
    pub fn monitor(&self, edge: EdgeDetect, options: RequestOptions) -> Result<&Self> {
        self.configure(Config::Event { edge, options }, "monitor")
    }

    /// Request the configured line from the kernel.
    ///
    /// On failure the line is back in [`LineState::Free`] and no native
    /// handle is kept.
    pub fn acquire(&self) -> Result<LineGuard<'_, 'c, B>> {
        let mut state = self.lock();
        let config = match &*state {
            State::Configuring(config) => *config,
            other => return Err(Error::state(self.offset, other.view(), "acquire")),
        };

        let backend = self.chip.backend();
        let chip = self.chip.raw()?;

        let mut handle = match backend.chip_get_line(chip, self.offset) {
            Ok(handle) => handle,
            Err(source) => {
                *state = State::Free(Some(config));
                return Err(ErrorKind::Acquire {
                    offset: self.offset,
                    source,
                }
                .into());
            }
        };

        let requested = match config {
            Config::Io {
                direction: Direction::Input,
                options,
                ..
            } => backend.line_request_input(&mut handle, &self.consumer, options),
            Config::Io {
                direction: Direction::Output,
                default,
                options,
            } => backend.line_request_output(&mut handle, &self.consumer, options, default),
            Config::Event { edge, options } => {
                backend.line_request_event(&mut handle, &self.consumer, edge, options)
            }
        };

        if let Err(source) = requested {
            // The handle never held a request, dropping it is all the
            // cleanup it needs.
            drop(handle);
            *state = State::Free(Some(config));
            return Err(ErrorKind::Request {
                offset: self.offset,
                source,
            }
            .into());
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        *state = State::Active(Acquired {
            handle,
            config,
            generation,
            events: None,
        });
        log::debug!(
            "Acquired line {}:{} as {}",
            self.chip,
            self.offset,
            state.view()
        );

        Ok(LineGuard {
            line: self,
            generation,
        })
    }

    /// Exit transition of the acquisition `generation`.
    fn release(&self, generation: u64) {
        let mut state = self.lock();
        let config = match &*state {
            State::Active(acq) if acq.generation == generation => acq.config,
            _ => return,
        };
        let acq = match std::mem::replace(&mut *state, State::Free(Some(config))) {
            State::Active(acq) => acq,
            _ => return,
        };

        let Acquired {
            handle, events, ..
        } = acq;
        // Deregister before the descriptor goes away.
        drop(events);

        // Still locked: nobody can request the line again before the kernel
        // has let go of it.
        match self.chip.backend().line_release(handle) {
            Ok(()) => log::debug!("Released line {}:{}", self.chip, self.offset),
            Err(e) => log::warn!(
                "Error releasing line {}:{}, ignored: {e}",
                self.chip,
                self.offset
            ),
        }
        drop(state);

        self.waker.wake();
    }

    fn with_handle<T>(&self, f: impl FnOnce(&B, &B::Line) -> std::io::Result<T>) -> Result<T> {
        let state = self.lock();
        match &*state {
            State::Active(acq) => Ok(f(self.chip.backend(), &acq.handle)?),
            _ => Err(Error::not_open(self.offset)),
        }
    }

    /// The logical value of the line.
    pub fn value(&self) -> Result<LineValue> {
        self.with_handle(|b, h| b.line_get_value(h))
    }

    pub fn set_value(&self, value: impl Into<LineValue>) -> Result<()> {
        let value = value.into();
        self.with_handle(|b, h| b.line_set_value(h, value))
    }

    /// Kernel metadata snapshot of the acquired line.
    pub fn info(&self) -> Result<LineInfo> {
        self.with_handle(|b, h| b.line_info(h))
    }

    /// The direction reported by the kernel while acquired, or the
    /// configured one otherwise.
    pub fn direction(&self) -> Result<Direction> {
        if matches!(self.state(), LineState::Active(_)) {
            return Ok(self.info()?.direction());
        }
        self.lock()
            .config()
            .map(Config::direction)
            .ok_or_else(|| Error::not_open(self.offset))
    }

    pub fn active_state(&self) -> Result<Active> {
        Ok(self.info()?.active_state())
    }

    pub fn is_open_drain(&self) -> Result<bool> {
        Ok(self.info()?.is_open_drain())
    }

    pub fn is_open_source(&self) -> Result<bool> {
        Ok(self.info()?.is_open_source())
    }

    pub fn is_used(&self) -> Result<bool> {
        Ok(self.info()?.is_used())
    }

    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.info()?.name().map(str::to_owned))
    }

    /// The consumer label the kernel reports while acquired, or the label
    /// the line will be requested under.
    pub fn consumer(&self) -> Result<String> {
        if matches!(self.state(), LineState::Active(_)) {
            if let Some(consumer) = self.info()?.consumer() {
                return Ok(consumer.to_owned());
            }
        }
        Ok(self.consumer.to_string())
    }

    /// The chip-relative offset. It is fixed when the line is created from
    /// the chip, so it is not read back from the kernel the way
    /// [`consumer`](Line::consumer) and [`direction`](Line::direction) are.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Stream of edge events for the current acquisition.
    ///
    /// Fails with [`ErrorKind::State`] unless the line is in
    /// `Active(Event)`.
    pub fn events(&self) -> Result<LineEvents<'_, 'c, B>> {
        let state = self.lock();
        match &*state {
            State::Active(Acquired {
                config: Config::Event { .. },
                generation,
                ..
            }) => Ok(LineEvents::new(self, *generation)),
            other => Err(Error::state(self.offset, other.view(), "iterate events")),
        }
    }
}

impl<B: Backend> fmt::Display for Line<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Line {}:{} {}>", self.chip, self.offset, self.state())
    }
}

impl<B: Backend> fmt::Debug for Line<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Line")
            .field("chip", &self.chip)
            .field("offset", &self.offset)
            .field("consumer", &self.consumer)
            .field("state", &self.state())
            .finish()
    }
}

impl<B: Backend> Drop for Line<'_, B> {
    fn drop(&mut self) {
        let active = match self.state.get_mut().unwrap_or_else(PoisonError::into_inner) {
            State::Active(acq) => Some(acq.generation),
            _ => None,
        };
        if let Some(generation) = active {
            self.release(generation);
        }
    }
}

/// An active acquisition of a [`Line`].
///
/// Dropping the guard (or calling [`release`](LineGuard::release)) releases
/// the line exactly once. Release errors are logged and otherwise ignored,
/// the line always ends up [`Free`](LineState::Free).
pub struct LineGuard<'l, 'c, B: Backend> {
    line: &'l Line<'c, B>,
    generation: u64,
}

impl<'l, 'c, B: Backend> LineGuard<'l, 'c, B> {
    pub fn line(&self) -> &'l Line<'c, B> {
        self.line
    }

    pub fn release(self) {
        drop(self)
    }
}

impl<'c, B: Backend> std::ops::Deref for LineGuard<'_, 'c, B> {
    type Target = Line<'c, B>;

    fn deref(&self) -> &Self::Target {
        self.line
    }
}

impl<B: Backend> Drop for LineGuard<'_, '_, B> {
    fn drop(&mut self) {
        self.line.release(self.generation);
    }
}

impl<B: Backend> fmt::Debug for LineGuard<'_, '_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineGuard")
            .field("line", self.line)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chip::ChipConfig;
    use crate::native::mock::MockBackend;
    use super::options::Drive;

    fn backend() -> MockBackend {
        MockBackend::new().with_chip(0, "gpio-mockup-A", 32)
    }

    fn open_chip(backend: &MockBackend) -> Chip<MockBackend> {
        Chip::open(backend.clone(), ChipConfig::new(0, "test").unwrap()).unwrap()
    }

    fn output() -> (Direction, LineValue, RequestOptions) {
        (Direction::Output, LineValue::Inactive, RequestOptions::new())
    }

    fn is_state_error(err: &Error) -> bool {
        matches!(err.kind(), ErrorKind::State { .. })
    }

    fn is_not_open(err: &Error) -> bool {
        matches!(err.kind(), ErrorKind::NotOpen { .. })
    }

    #[test]
    fn accessors_need_an_acquisition() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(19);

        assert_eq!(line.state(), LineState::Free);
        assert!(is_not_open(&line.value().unwrap_err()));
        assert!(is_not_open(&line.set_value(true).unwrap_err()));
        assert!(is_not_open(&line.active_state().unwrap_err()));
        assert!(is_not_open(&line.is_open_drain().unwrap_err()));
        assert!(is_not_open(&line.is_open_source().unwrap_err()));
        assert!(is_not_open(&line.is_used().unwrap_err()));
        assert!(is_not_open(&line.name().unwrap_err()));
        assert!(is_not_open(&line.direction().unwrap_err()));

        assert_eq!(line.offset(), 19);
        assert_eq!(line.consumer().unwrap(), "test");

        let (direction, default, options) = output();
        line.open(direction, default, options).unwrap();
        assert_eq!(line.state(), LineState::Configuring(Mode::Io));
        assert_eq!(line.direction().unwrap(), Direction::Output);
        assert!(is_not_open(&line.value().unwrap_err()));
    }

    #[test]
    fn acquire_from_free_is_a_state_error() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(2);

        assert!(is_state_error(&line.acquire().unwrap_err()));
        assert_eq!(line.state(), LineState::Free);
        assert_eq!(backend.stats().requests, 0);
    }

    #[test]
    fn reconfiguring_while_active_is_rejected() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(19);

        let (direction, default, options) = output();
        let guard = line.open(direction, default, options).unwrap().acquire().unwrap();
        guard.set_value(LineValue::Active).unwrap();

        let err = line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap_err();
        assert!(is_state_error(&err));
        assert_eq!(err.to_string(), "Line 19 cannot open while active-io");
        assert!(is_state_error(
            &line.monitor(EdgeDetect::Both, RequestOptions::new()).unwrap_err()
        ));
        assert!(is_state_error(&line.acquire().unwrap_err()));

        // The existing acquisition is untouched.
        assert_eq!(line.state(), LineState::Active(Mode::Io));
        assert_eq!(line.value().unwrap(), LineValue::Active);
        assert_eq!(line.direction().unwrap(), Direction::Output);
        drop(guard);

        let guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        assert!(is_state_error(&line.open(direction, default, options).unwrap_err()));
        assert_eq!(guard.state(), LineState::Active(Mode::Event));
    }

    #[test]
    fn configuring_kinds_do_not_mix() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(4);

        line.monitor(EdgeDetect::Rising, RequestOptions::new()).unwrap();
        line.monitor(EdgeDetect::Falling, RequestOptions::new()).unwrap();
        assert_eq!(line.state(), LineState::Configuring(Mode::Event));

        let err = line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap_err();
        assert!(is_state_error(&err));
        assert_eq!(line.state(), LineState::Configuring(Mode::Event));
    }

    #[test]
    fn requests_and_releases_balance_over_cycles() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(7);

        for cycle in 0..3 {
            let guard = if cycle % 2 == 0 {
                line.open(Direction::Input, LineValue::Inactive, RequestOptions::new())
                    .unwrap()
                    .acquire()
                    .unwrap()
            } else {
                line.monitor(EdgeDetect::Both, RequestOptions::new())
                    .unwrap()
                    .acquire()
                    .unwrap()
            };
            assert!(backend.is_requested(0, 7));
            guard.release();
            assert_eq!(line.state(), LineState::Free);
            assert!(!backend.is_requested(0, 7));
        }

        let stats = backend.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.releases, 3);
    }

    #[test]
    fn failed_request_returns_to_free() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(19);
        let (direction, default, options) = output();

        backend.fail_next_request(libc::EBUSY);
        let err = line
            .open(direction, default, options)
            .unwrap()
            .acquire()
            .unwrap_err();
        match err.kind() {
            ErrorKind::Request { offset, source } => {
                assert_eq!(*offset, 19);
                assert_eq!(source.raw_os_error(), Some(libc::EBUSY));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(line.state(), LineState::Free);
        assert_eq!(backend.stats().releases, 0);

        let guard = line.open(direction, default, options).unwrap().acquire().unwrap();
        assert_eq!(guard.state(), LineState::Active(Mode::Io));
        drop(guard);

        let stats = backend.stats();
        assert_eq!((stats.requests, stats.releases), (1, 1));
    }

    #[test]
    fn bad_offset_fails_to_acquire() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(99);

        let err = line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Acquire { offset: 99, .. }));
        assert_eq!(line.state(), LineState::Free);
    }

    #[test]
    fn same_offset_from_two_lines_is_left_to_the_kernel() {
        let backend = backend();
        let chip = open_chip(&backend);
        let first = chip.line(5);
        let second = chip.line(5);

        let _guard = first
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let err = second
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Request { .. }));
        assert_eq!(second.state(), LineState::Free);
    }

    #[test]
    fn loopback_round_trip() {
        let backend = backend();
        backend.link(0, 19, 20);
        let chip = open_chip(&backend);

        let out = chip.line(19);
        let input = chip.line(20);
        let out = out
            .open(Direction::Output, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let input = input
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();

        out.set_value(1u8).unwrap();
        assert_eq!(input.value().unwrap(), LineValue::Active);
        out.set_value(0u8).unwrap();
        assert_eq!(input.value().unwrap(), LineValue::Inactive);

        drop(input);
        drop(out);
        assert_eq!(backend.stats().releases, 2);
    }

    #[test]
    fn release_failure_is_suppressed() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(3);

        backend.fail_releases(true);
        let guard = line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        drop(guard);

        assert_eq!(line.state(), LineState::Free);
        assert_eq!(backend.stats().releases, 1);

        backend.fail_releases(false);
        assert!(line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .is_ok());
    }

    #[test]
    fn metadata_while_acquired() {
        let backend = backend().with_line_name(0, 19, "LED");
        let chip = open_chip(&backend);
        let line = chip.line_with_consumer(19, "blinker").unwrap();

        let options = RequestOptions::new()
            .with_active(Active::Low)
            .with_drive(Drive::OpenDrain);
        let guard = line
            .open(Direction::Output, LineValue::Inactive, options)
            .unwrap()
            .acquire()
            .unwrap();

        assert_eq!(guard.name().unwrap().as_deref(), Some("LED"));
        assert_eq!(guard.consumer().unwrap(), "blinker");
        assert_eq!(guard.active_state().unwrap(), Active::Low);
        assert!(guard.is_used().unwrap());
        assert!(guard.is_open_drain().unwrap());
        assert!(!guard.is_open_source().unwrap());
        assert_eq!(guard.info().unwrap().offset(), guard.offset());
    }

    #[test]
    fn released_lines_are_free_in_the_kernel_before_anyone_sees_them_free() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let acquired = line
                            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
                            .and_then(|l| l.acquire());
                        match acquired {
                            Ok(guard) => drop(guard),
                            Err(e) => assert!(is_state_error(&e), "unexpected: {e}"),
                        }
                    }
                });
            }
        });

        assert!(!backend.is_requested(0, 20));
        let stats = backend.stats();
        assert!(stats.requests > 0);
        assert_eq!(stats.requests, stats.releases);
    }

    #[test]
    fn display() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(19);
        assert_eq!(line.to_string(), "<Line Chip(0):19 free>");

        let (direction, default, options) = output();
        let guard = line.open(direction, default, options).unwrap().acquire().unwrap();
        assert_eq!(guard.to_string(), "<Line Chip(0):19 active-io>");
    }

    #[test]
    fn dropping_an_acquired_line_releases_it() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(8);

        let guard = line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        std::mem::forget(guard);
        drop(line);

        assert!(!backend.is_requested(0, 8));
        assert_eq!(backend.stats().releases, 1);
    }
}
