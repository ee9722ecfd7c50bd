//! Scoped access to a GPIO chip.
//!
//! A [`Chip`] holds its native handle from [`Chip::open`] until it is
//! dropped. Every [`Line`] borrows the chip it came from, so lines cannot
//! outlive it.

use std::{fmt, io};

use crate::{
    errors::{Error, ErrorKind, Result},
    fixed_str::Label,
    line::Line,
    native::Backend,
};

/// How a chip is identified: by its index (`/dev/gpiochipN`) or by the
/// label its driver reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChipSelector {
    Number(u32),
    Label(String),
}

impl ChipSelector {
    /// Build a selector from optional parts, exactly one of which must be
    /// given.
    pub fn from_parts(number: Option<u32>, label: Option<&str>) -> Result<Self> {
        match (number, label) {
            (Some(n), None) => Ok(Self::Number(n)),
            (None, Some(l)) => Ok(Self::Label(l.to_owned())),
            (Some(_), Some(_)) => Err(Error::configuration(
                "chip selected by both number and label",
            )),
            (None, None) => Err(Error::configuration(
                "chip needs either a number or a label",
            )),
        }
    }
}

impl From<u32> for ChipSelector {
    fn from(number: u32) -> Self {
        Self::Number(number)
    }
}

impl From<&str> for ChipSelector {
    fn from(label: &str) -> Self {
        Self::Label(label.to_owned())
    }
}

impl fmt::Display for ChipSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipSelector::Number(n) => n.fmt(f),
            ChipSelector::Label(l) => l.fmt(f),
        }
    }
}

/// Which chip to open and the consumer label its lines are requested
/// under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipConfig {
    selector: ChipSelector,
    consumer: Label,
}

impl ChipConfig {
    /// Fails if `consumer` does not fit the kernel's label size.
    pub fn new(selector: impl Into<ChipSelector>, consumer: &str) -> Result<Self> {
        Ok(Self {
            selector: selector.into(),
            consumer: consumer_label(consumer)?,
        })
    }

    pub fn selector(&self) -> &ChipSelector {
        &self.selector
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

pub(crate) fn consumer_label(consumer: &str) -> Result<Label> {
    Label::new(consumer)
        .map_err(|e| Error::configuration(format!("consumer {consumer:?}: {e}")))
}

/// An open GPIO chip.
///
/// Dropping the chip closes it.
pub struct Chip<B: Backend> {
    backend: B,
    config: ChipConfig,
    handle: Option<B::Chip>,
}

impl<B: Backend> Chip<B> {
    pub fn open(backend: B, config: ChipConfig) -> Result<Self> {
        let opened = match &config.selector {
            ChipSelector::Number(n) => backend.chip_open_by_number(*n),
            ChipSelector::Label(l) => backend.chip_open_by_label(l),
        };

        let handle = opened.map_err(|source| ErrorKind::Open {
            selector: config.selector.to_string(),
            source,
        })?;
        log::debug!("Opened chip {}", config.selector);

        Ok(Self {
            backend,
            config,
            handle: Some(handle),
        })
    }

    /// A line at `offset`, requested under the chip's consumer label.
    ///
    /// The offset is only checked against the chip when the line is
    /// acquired.
    pub fn line(&self, offset: u32) -> Line<'_, B> {
        Line::new(self, offset, self.config.consumer)
    }

    pub fn line_with_consumer(&self, offset: u32, consumer: &str) -> Result<Line<'_, B>> {
        Ok(Line::new(self, offset, consumer_label(consumer)?))
    }

    pub fn selector(&self) -> &ChipSelector {
        &self.config.selector
    }

    pub fn consumer(&self) -> &str {
        self.config.consumer()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn raw(&self) -> io::Result<&B::Chip> {
        self.handle
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }
}

impl<B: Backend> Drop for Chip<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.chip_close(handle);
            log::debug!("Closed chip {}", self.config.selector);
        }
    }
}

impl<B: Backend> fmt::Display for Chip<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chip({})", self.config.selector)
    }
}

impl<B: Backend> fmt::Debug for Chip<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chip")
            .field("selector", &self.config.selector)
            .field("consumer", &self.config.consumer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::native::mock::MockBackend;

    fn backend() -> MockBackend {
        MockBackend::new()
            .with_chip(0, "gpio-mockup-A", 8)
            .with_chip(1, "gpio-mockup-B", 8)
    }

    #[test]
    fn selector_needs_exactly_one_part() {
        assert_eq!(
            ChipSelector::from_parts(Some(0), None).unwrap(),
            ChipSelector::Number(0)
        );
        assert_eq!(
            ChipSelector::from_parts(None, Some("gpio-mockup-A")).unwrap(),
            ChipSelector::Label("gpio-mockup-A".into())
        );

        for err in [
            ChipSelector::from_parts(Some(0), Some("gpio-mockup-A")).unwrap_err(),
            ChipSelector::from_parts(None, None).unwrap_err(),
        ] {
            assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
        }
    }

    #[test]
    fn oversized_consumer_is_rejected() {
        let err = ChipConfig::new(0, &"x".repeat(32)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
        assert!(ChipConfig::new(0, &"x".repeat(31)).is_ok());
    }

    #[test]
    fn open_by_label_and_close_on_drop() {
        let backend = backend();
        let config = ChipConfig::new("gpio-mockup-B", "test").unwrap();

        let chip = Chip::open(backend.clone(), config).unwrap();
        assert_eq!(chip.to_string(), "Chip(gpio-mockup-B)");
        assert_eq!(backend.stats().chip_opens, 1);
        assert_eq!(backend.stats().chip_closes, 0);

        drop(chip);
        assert_eq!(backend.stats().chip_closes, 1);
    }

    #[test]
    fn unknown_chip_fails_to_open() {
        let err = Chip::open(backend(), ChipConfig::new(4, "test").unwrap()).unwrap_err();
        match err.kind() {
            ErrorKind::Open { selector, source } => {
                assert_eq!(selector, "4");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn lines_inherit_the_consumer() {
        let chip = Chip::open(backend(), ChipConfig::new(0, "relay-board").unwrap()).unwrap();
        assert_eq!(chip.to_string(), "Chip(0)");

        let line = chip.line(3);
        assert_eq!(line.consumer().unwrap(), "relay-board");

        let line = chip.line_with_consumer(4, "button").unwrap();
        assert_eq!(line.consumer().unwrap(), "button");
        assert!(chip.line_with_consumer(4, "bad\0label").is_err());
    }
}
