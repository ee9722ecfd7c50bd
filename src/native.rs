//! The foreign boundary between the line state machine and whatever
//! actually drives the hardware.
//!
//! [`Backend`] exposes exactly the primitives the state machine needs and
//! nothing else. Every primitive reports failure through `io::Result`; the
//! state machine translates those into the crate's typed errors.
//!
//! Two implementations ship with the crate: [`CdevBackend`] talks to the
//! kernel through `/dev/gpiochipN`, and `mock::MockBackend` (feature
//! `mock`) simulates chips in-process.

use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;

use crate::line::{
    options::{EdgeDetect, RequestOptions},
    LineInfo, LineValue,
};

mod cdev;

#[cfg(any(test, feature = "mock"))]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;

pub use cdev::CdevBackend;

/// A native edge event record, before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Edge tag, `uapi::v2::EVENT_RISING_EDGE` or `EVENT_FALLING_EDGE`
    pub edge: u32,
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl RawEvent {
    pub const fn new(edge: u32, seconds: u64, nanoseconds: u32) -> Self {
        Self {
            edge,
            seconds,
            nanoseconds,
        }
    }
}

/// Native GPIO primitives.
///
/// `Chip` and `Line` are opaque native handles. A `Line` handle obtained
/// from [`Backend::chip_get_line`] that never had a request succeed is
/// simply dropped; only successfully requested handles are passed to
/// [`Backend::line_release`].
pub trait Backend {
    type Chip;
    type Line;

    fn chip_open_by_number(&self, number: u32) -> io::Result<Self::Chip>;

    fn chip_open_by_label(&self, label: &str) -> io::Result<Self::Chip>;

    fn chip_close(&self, chip: Self::Chip);

    /// Resolve the line at `offset`. The backend is authoritative on range.
    fn chip_get_line(&self, chip: &Self::Chip, offset: u32) -> io::Result<Self::Line>;

    fn line_request_input(
        &self,
        line: &mut Self::Line,
        consumer: &str,
        options: RequestOptions,
    ) -> io::Result<()>;

    fn line_request_output(
        &self,
        line: &mut Self::Line,
        consumer: &str,
        options: RequestOptions,
        default: LineValue,
    ) -> io::Result<()>;

    fn line_request_event(
        &self,
        line: &mut Self::Line,
        consumer: &str,
        edge: EdgeDetect,
        options: RequestOptions,
    ) -> io::Result<()>;

    fn line_release(&self, line: Self::Line) -> io::Result<()>;

    fn line_get_value(&self, line: &Self::Line) -> io::Result<LineValue>;

    fn line_set_value(&self, line: &Self::Line, value: LineValue) -> io::Result<()>;

    /// The pollable descriptor of an event request.
    ///
    /// The descriptor must be non-blocking and stays owned by `line`.
    fn line_event_get_fd(&self, line: &Self::Line) -> io::Result<RawFd>;

    /// Read exactly one event from `fd`.
    ///
    /// Must fail with [`io::ErrorKind::WouldBlock`] when no event is
    /// pending.
    fn line_event_read_fd(&self, fd: RawFd) -> io::Result<RawEvent>;

    fn line_info(&self, line: &Self::Line) -> io::Result<LineInfo>;
}

/// Read one fixed-size record from `fd`, retrying on `EINTR`.
pub(crate) fn read_record<const N: usize>(fd: RawFd) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    let n = loop {
        match nix::unistd::read(fd, &mut buf) {
            Err(Errno::EINTR) => continue,
            res => break res?,
        }
    };

    if n != N {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Short event read: {n} of {N} bytes"),
        ));
    }
    Ok(buf)
}

#[cfg(test)]
mod test {
    use std::os::{fd::AsRawFd, unix::net::UnixDatagram};

    use super::*;

    #[test]
    fn records_are_read_whole() {
        let (tx, rx) = UnixDatagram::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        tx.send(&[7u8; 4]).unwrap();
        assert_eq!(read_record::<4>(rx.as_raw_fd()).unwrap(), [7u8; 4]);

        assert_eq!(
            read_record::<4>(rx.as_raw_fd()).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        tx.send(&[1u8; 2]).unwrap();
        assert_eq!(
            read_record::<4>(rx.as_raw_fd()).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
