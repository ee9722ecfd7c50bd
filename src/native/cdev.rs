use std::{
    fs::File,
    io::{self, Result},
    os::{
        fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
};

use bstr::ByteSlice;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use super::{read_record, Backend, RawEvent};
use crate::{
    fixed_str::Label,
    line::{
        options::{Direction, EdgeDetect, RequestOptions},
        LineInfo, LineValue,
    },
    uapi::{self, v2},
};

/// [`Backend`] over the GPIO character devices in `/dev`.
#[derive(Debug, Clone)]
pub struct CdevBackend {
    dev_dir: PathBuf,
}

impl CdevBackend {
    pub fn new() -> Self {
        Self::with_dev_dir("/dev")
    }

    /// Look for `gpiochipN` nodes somewhere other than `/dev`.
    pub fn with_dev_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dir.into(),
        }
    }
}

impl Default for CdevBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// An open `/dev/gpiochipN`.
#[derive(Debug)]
pub struct CdevChip {
    fd: OwnedFd,
    path: PathBuf,
    info: ChipInfo,
}

impl CdevChip {
    fn open(path: &Path) -> Result<Self> {
        let f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let fd = OwnedFd::from(f);
        let info = ChipInfo::read(fd.as_raw_fd())?;
        Ok(Self {
            fd,
            path: path.to_owned(),
            info,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &ChipInfo {
        &self.info
    }
}

#[derive(Debug, Clone)]
pub struct ChipInfo {
    name: Label,
    label: Label,
    lines: u32,
}

impl ChipInfo {
    fn read(fd: RawFd) -> Result<Self> {
        let mut info = uapi::gpio_chip_info::zeroed();
        // Error condition: -1, already handled
        let _ = unsafe { uapi::gpio_get_chipinfo(fd, &mut info)? };

        Ok(ChipInfo {
            name: Label::from_byte_array(info.name)?,
            label: Label::from_byte_array(info.label)?,
            lines: info.lines,
        })
    }

    /// The name of the device driving this GPIO chip in the kernel
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// A functional name for this GPIO chip, such as a product number.  Might
    /// be an empty string.
    ///
    /// As an example, the SoC GPIO chip on a Raspberry Pi is "pinctrl-bcm2835"
    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// The number of lines/pins indexable through this chip
    pub const fn num_lines(&self) -> u32 {
        self.lines
    }
}

/// A line on a [`CdevChip`], holding the request descriptor once requested.
#[derive(Debug)]
pub struct CdevLine {
    chip_fd: OwnedFd,
    offset: u32,
    request: Option<File>,
}

impl CdevLine {
    fn request_fd(&self) -> Result<RawFd> {
        self.request
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn issue(&self, mut req: v2::gpio_line_request) -> Result<File> {
        if self.request.is_some() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }

        let _ = unsafe { v2::gpio_get_line(self.chip_fd.as_raw_fd(), &mut req)? };
        if req.fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        Ok(unsafe { File::from_raw_fd(req.fd) })
    }
}

/// Iterate over the `gpiochip*` nodes of `dir`, opening each.
fn chips(dir: &Path) -> Result<impl Iterator<Item = Result<CdevChip>>> {
    let readdir = std::fs::read_dir(dir)?;

    Ok(readdir.filter_map(|entry| {
        let e = match entry {
            Ok(e) => e,
            Err(e) => return Some(Err(e)),
        };
        let p = e.path();
        let f = p.file_name()?;
        if f.as_bytes().starts_with_str("gpiochip") {
            Some(CdevChip::open(&p))
        } else {
            None
        }
    }))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

impl Backend for CdevBackend {
    type Chip = CdevChip;
    type Line = CdevLine;

    fn chip_open_by_number(&self, number: u32) -> Result<CdevChip> {
        CdevChip::open(&self.dev_dir.join(format!("gpiochip{number}")))
    }

    fn chip_open_by_label(&self, label: &str) -> Result<CdevChip> {
        for chip in chips(&self.dev_dir)? {
            match chip {
                Ok(chip) if chip.info.label() == label => return Ok(chip),
                Ok(_) => {}
                Err(e) => log::debug!("Skipping unreadable chip while looking for {label:?}: {e}"),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No GPIO chip labelled {label:?}"),
        ))
    }

    fn chip_close(&self, chip: CdevChip) {
        drop(chip);
    }

    fn chip_get_line(&self, chip: &CdevChip, offset: u32) -> Result<CdevLine> {
        if offset >= chip.info.num_lines() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        Ok(CdevLine {
            chip_fd: chip.fd.as_fd().try_clone_to_owned()?,
            offset,
            request: None,
        })
    }

    fn line_request_input(
        &self,
        line: &mut CdevLine,
        consumer: &str,
        options: RequestOptions,
    ) -> Result<()> {
        let req = v2::gpio_line_request::single(
            line.offset,
            Label::new(consumer)?.into_byte_array(),
            options.build_v2_io(Direction::Input),
        );
        line.request = Some(line.issue(req)?);
        Ok(())
    }

    fn line_request_output(
        &self,
        line: &mut CdevLine,
        consumer: &str,
        options: RequestOptions,
        default: LineValue,
    ) -> Result<()> {
        let mut req = v2::gpio_line_request::single(
            line.offset,
            Label::new(consumer)?.into_byte_array(),
            options.build_v2_io(Direction::Output),
        );
        let attr = v2::gpio_line_attribute {
            id: v2::ATTR_ID_OUTPUT_VALUES,
            _padding: 0,
            attribute: v2::gpio_line_attribute_union {
                values: default.as_u8() as u64,
            },
        };
        req.config.push_attr(attr, 1);

        line.request = Some(line.issue(req)?);
        Ok(())
    }

    fn line_request_event(
        &self,
        line: &mut CdevLine,
        consumer: &str,
        edge: EdgeDetect,
        options: RequestOptions,
    ) -> Result<()> {
        let req = v2::gpio_line_request::single(
            line.offset,
            Label::new(consumer)?.into_byte_array(),
            options.build_v2_event(edge),
        );
        let file = line.issue(req)?;
        set_nonblocking(file.as_raw_fd())?;
        line.request = Some(file);
        Ok(())
    }

    fn line_release(&self, mut line: CdevLine) -> Result<()> {
        let file = line
            .request
            .take()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;

        nix::unistd::close(file.into_raw_fd())?;
        Ok(())
    }

    fn line_get_value(&self, line: &CdevLine) -> Result<LineValue> {
        let mut data = v2::gpio_line_values { bits: 0, mask: 1 };
        let _ = unsafe { v2::gpio_line_get_values(line.request_fd()?, &mut data)? };
        Ok(LineValue::new(data.bits & 1 != 0))
    }

    fn line_set_value(&self, line: &CdevLine, value: LineValue) -> Result<()> {
        let mut data = v2::gpio_line_values {
            bits: value.as_u8() as u64,
            mask: 1,
        };
        let _ = unsafe { v2::gpio_line_set_values(line.request_fd()?, &mut data)? };
        Ok(())
    }

    fn line_event_get_fd(&self, line: &CdevLine) -> Result<RawFd> {
        line.request_fd()
    }

    fn line_event_read_fd(&self, fd: RawFd) -> Result<RawEvent> {
        let buf = read_record::<{ v2::EVENT_SIZE }>(fd)?;
        let event = unsafe { v2::gpio_line_event::from_bytes(buf) };
        let ts = crate::line::Timestamp::from_nanos(event.timestamp_ns);
        Ok(RawEvent::new(event.id, ts.secs(), ts.subsec_nanos()))
    }

    fn line_info(&self, line: &CdevLine) -> Result<LineInfo> {
        let mut info = v2::gpio_line_info::for_offset(line.offset);
        let _ = unsafe { v2::gpio_get_line_info(line.chip_fd.as_raw_fd(), &mut info)? };
        LineInfo::from_v2(info)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_chip_number_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CdevBackend::with_dev_dir(dir.path());

        let err = backend.chip_open_by_number(7).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn unknown_label_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("null"), b"").unwrap();
        let backend = CdevBackend::with_dev_dir(dir.path());

        let err = backend.chip_open_by_label("gpio-mockup-A").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn non_chip_node_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpiochip0"), b"not a device").unwrap();
        let backend = CdevBackend::with_dev_dir(dir.path());

        // The chip-info ioctl fails on a regular file.
        assert!(backend.chip_open_by_number(0).is_err());
    }
}
