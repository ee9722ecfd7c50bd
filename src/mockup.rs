//! Helpers for testing against the kernel's `gpio-mockup` module.
//!
//! [`GpioWatcher`] polls `/sys/kernel/debug/gpio` and reports changes of
//! watched pins. [`GpioWatcher::set`] drives a mockup pin through
//! `/sys/kernel/debug/gpio-mockup-event`.

use std::{
    collections::HashMap,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, space1},
    combinator::{map, map_res},
    sequence::{preceded, separated_pair, terminated, tuple},
    IResult,
};
use tokio::sync::broadcast;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_DEBUGFS: &str = "/sys/kernel/debug";

const CHANNEL_CAPACITY: usize = 10;

/// Direction and level of a pin as debugfs shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinState {
    /// Configured as an output
    pub out: bool,
    /// Physically high
    pub high: bool,
}

/// One pin line of the debugfs listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugfsPin {
    pub chip: String,
    /// Chip-relative offset
    pub pin: u32,
    pub state: PinState,
}

struct ChipHeader<'a> {
    chip: &'a str,
    base: u32,
    name: Option<&'a str>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// `gpiochip0: GPIOs 496-503, parent: platform/gpio-mockup.0, gpio-mockup-A:`
fn chip_header(input: &str) -> IResult<&str, ChipHeader<'_>> {
    let (rest, (chip, base)) = terminated(
        separated_pair(
            take_while1(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()),
            tag(": GPIOs "),
            map_res(digit1, str::parse::<u32>),
        ),
        char('-'),
    )(input)?;

    // The chip name, when present, is the last comma-separated field.
    let name = rest
        .trim_end()
        .strip_suffix(':')
        .and_then(|s| s.rsplit_once(", "))
        .map(|(_, name)| name)
        .filter(|name| !name.is_empty() && name.chars().all(is_name_char));

    Ok(("", ChipHeader { chip, base, name }))
}

/// `in  hi` / `out lo`
fn direction_level(input: &str) -> IResult<&str, PinState> {
    map(
        separated_pair(
            alt((map(tag("out"), |_| true), map(tag("in"), |_| false))),
            space1,
            alt((map(tag("hi"), |_| true), map(tag("lo"), |_| false))),
        ),
        |(out, high)| PinState { out, high },
    )(input)
}

/// `gpio-500 (                    |gpio-mockup-A-4     ) out hi`
fn pin_line(input: &str) -> IResult<&str, (u32, PinState)> {
    let (rest, (n, _)) = tuple((
        preceded(tag("gpio-"), map_res(digit1, str::parse::<u32>)),
        tag(" ("),
    ))(input)?;

    // The label may itself contain ") ", so take the last split that
    // parses.
    for (idx, _) in rest.rmatch_indices(") ") {
        if let Ok((tail, state)) = direction_level(&rest[idx + 2..]) {
            return Ok((tail, (n, state)));
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        rest,
        nom::error::ErrorKind::Tag,
    )))
}

fn invalid(line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Unexpected debugfs line: {line:?}"),
    )
}

/// Parse the text of `/sys/kernel/debug/gpio`.
///
/// Every chip block starts with a header line and ends at a blank line.
/// Pins are reported relative to the chip's base number.
pub fn parse_debugfs(text: &str) -> io::Result<Vec<DebugfsPin>> {
    let mut pins = Vec::new();
    let mut chip: Option<(String, u32)> = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            chip = None;
            continue;
        }

        match &chip {
            None => {
                let (_, header) = chip_header(line).map_err(|_| invalid(line))?;
                let key = header.name.unwrap_or(header.chip);
                chip = Some((key.to_owned(), header.base));
            }
            Some((name, base)) => {
                let (_, (n, state)) = pin_line(line).map_err(|_| invalid(line))?;
                let pin = n.checked_sub(*base).ok_or_else(|| invalid(line))?;
                pins.push(DebugfsPin {
                    chip: name.clone(),
                    pin,
                    state,
                });
            }
        }
    }

    Ok(pins)
}

struct Watched {
    seen: Option<PinState>,
    tx: broadcast::Sender<PinState>,
}

/// Polls the debugfs GPIO listing and notifies subscribers when a watched
/// pin changes direction or level.
pub struct GpioWatcher {
    interval: Duration,
    debugfs_path: PathBuf,
    pins: Mutex<HashMap<(String, u32), Watched>>,
}

impl GpioWatcher {
    pub fn new(interval: Duration, debugfs_path: impl Into<PathBuf>) -> Self {
        Self {
            interval,
            debugfs_path: debugfs_path.into(),
            pins: Mutex::new(HashMap::new()),
        }
    }

    pub fn debugfs_path(&self) -> &Path {
        &self.debugfs_path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, u32), Watched>> {
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to state changes of `pin` on `chip`.
    ///
    /// The first poll after subscribing always reports the current state.
    /// Slow receivers lose the oldest states.
    pub fn watch(&self, chip: &str, pin: u32) -> broadcast::Receiver<PinState> {
        self.lock()
            .entry((chip.to_owned(), pin))
            .or_insert_with(|| Watched {
                seen: None,
                tx: broadcast::channel(CHANNEL_CAPACITY).0,
            })
            .tx
            .subscribe()
    }

    /// Read the listing once and notify about every watched pin whose
    /// state changed.
    pub async fn check_pins(&self) -> io::Result<()> {
        let text = tokio::fs::read_to_string(self.debugfs_path.join("gpio")).await?;
        let pins = parse_debugfs(&text)?;

        let mut watched = self.lock();
        for DebugfsPin { chip, pin, state } in pins {
            let Some(w) = watched.get_mut(&(chip, pin)) else {
                continue;
            };
            if w.seen == Some(state) {
                continue;
            }
            w.seen = Some(state);
            log::debug!("Pin {pin} now {state:?}");
            // No subscribers left is not an error.
            let _ = w.tx.send(state);
        }
        Ok(())
    }

    /// Poll forever at the configured interval.
    pub async fn run(&self) -> io::Result<()> {
        loop {
            self.check_pins().await?;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Drive a mockup pin high or low.
    ///
    /// Fails with [`io::ErrorKind::NotFound`] for pins that are not
    /// provided by `gpio-mockup`.
    pub fn set(&self, chip: &str, pin: u32, value: bool) -> io::Result<()> {
        let path = self
            .debugfs_path
            .join("gpio-mockup-event")
            .join(chip)
            .join(pin.to_string());
        log::debug!("Setting {chip}/{pin} to {value}");

        let mut f = std::fs::OpenOptions::new().write(true).open(path)?;
        f.write_all(if value { b"1" } else { b"0" })
    }
}

impl Default for GpioWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_DEBUGFS)
    }
}
