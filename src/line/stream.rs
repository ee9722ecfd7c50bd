use std::{
    io,
    os::fd::AsRawFd,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::{
    io::{unix::AsyncFd, Interest},
    runtime::Handle,
};

use super::{Config, Event, Line, State};
use crate::{
    errors::{Error, ErrorKind, Result},
    native::Backend,
};

/// Edge events of one acquisition of a [`Line`], in kernel order.
///
/// The stream never ends on its own. Once the acquisition it belongs to is
/// released every further step fails: with [`ErrorKind::NotOpen`] if the
/// release happened while the step was waiting, with [`ErrorKind::Closed`]
/// otherwise.
///
/// Dropping a pending [`next_event`](LineEvents::next_event) future does not
/// release the line.
///
/// Readiness comes from the Tokio reactor, so the stream has to be polled
/// from within a Tokio runtime. Polled anywhere else, every step fails with
/// [`ErrorKind::Closed`].
pub struct LineEvents<'l, 'c, B: Backend> {
    line: &'l Line<'c, B>,
    generation: u64,
    suspended: bool,
}

impl<'l, 'c, B: Backend> LineEvents<'l, 'c, B> {
    pub(super) fn new(line: &'l Line<'c, B>, generation: u64) -> Self {
        Self {
            line,
            generation,
            suspended: false,
        }
    }

    /// Wait for the next edge event.
    pub async fn next_event(&mut self) -> Result<Event> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Result<Event>> {
        let line = self.line;
        let offset = line.offset;
        line.waker.register(cx.waker());

        let mut state = line.lock();
        let acq = match &mut *state {
            State::Active(acq)
                if acq.generation == self.generation
                    && matches!(acq.config, Config::Event { .. }) =>
            {
                acq
            }
            _ => {
                let err = if self.suspended {
                    Error::not_open(offset)
                } else {
                    Error::closed(offset)
                };
                self.suspended = false;
                return Poll::Ready(Err(err));
            }
        };

        let backend = line.chip.backend();
        if acq.events.is_none() {
            let registered = Handle::try_current()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
                .and_then(|_| backend.line_event_get_fd(&acq.handle))
                .and_then(|fd| AsyncFd::with_interest(fd, Interest::READABLE));
            match registered {
                Ok(events) => acq.events = Some(events),
                Err(e) => {
                    log::debug!("Event descriptor of line {offset} unusable: {e}");
                    return Poll::Ready(Err(Error::closed(offset)));
                }
            }
        }
        let Some(events) = acq.events.as_ref() else {
            return Poll::Ready(Err(Error::closed(offset)));
        };

        loop {
            let mut ready = match events.poll_read_ready(cx) {
                Poll::Pending => {
                    self.suspended = true;
                    return Poll::Pending;
                }
                Poll::Ready(Err(source)) => {
                    return Poll::Ready(Err(ErrorKind::Read { offset, source }.into()))
                }
                Poll::Ready(Ok(ready)) => ready,
            };

            match ready.try_io(|fd| backend.line_event_read_fd(fd.as_raw_fd())) {
                // Readiness was stale; it has been cleared, wait again.
                Err(_would_block) => continue,
                Ok(Err(source)) => {
                    self.suspended = false;
                    return Poll::Ready(Err(ErrorKind::Read { offset, source }.into()));
                }
                Ok(Ok(raw)) => {
                    self.suspended = false;
                    let event = Event::decode(raw);
                    if let Ok(event) = &event {
                        log::trace!("Line {offset}: {event}");
                    }
                    return Poll::Ready(event);
                }
            }
        }
    }
}

impl<B: Backend> Stream for LineEvents<'_, '_, B> {
    type Item = Result<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_event(cx).map(Some)
    }
}

impl<B: Backend> std::fmt::Debug for LineEvents<'_, '_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineEvents")
            .field("offset", &self.line.offset)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::{
        chip::{Chip, ChipConfig},
        line::{
            options::{Direction, EdgeDetect, RequestOptions},
            Edge, LineState, LineValue, Mode,
        },
        native::{mock::MockBackend, RawEvent},
    };

    fn backend() -> MockBackend {
        MockBackend::new().with_chip(0, "gpio-mockup-A", 32)
    }

    fn open_chip(backend: &MockBackend) -> Chip<MockBackend> {
        Chip::open(backend.clone(), ChipConfig::new(0, "test").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn edges_arrive_in_order() {
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
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = input.events().unwrap();

        out.set_value(LineValue::Active).unwrap();
        out.set_value(LineValue::Inactive).unwrap();

        let first = events.next_event().await.unwrap();
        let second = events.next_event().await.unwrap();
        assert_eq!(first.value(), LineValue::Active);
        assert_eq!(first.edge(), Edge::Rising);
        assert_eq!(second.value(), LineValue::Inactive);
        assert!(second.raw_timestamp() > first.raw_timestamp());
    }

    #[tokio::test]
    async fn events_need_an_event_acquisition() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let err = line.events().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::State { .. }));

        line.monitor(EdgeDetect::Both, RequestOptions::new()).unwrap();
        assert!(matches!(
            line.events().unwrap_err().kind(),
            ErrorKind::State { .. }
        ));

        let line = chip.line(21);
        let _guard = line
            .open(Direction::Input, LineValue::Inactive, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let err = line.events().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Line 21 cannot iterate events while active-io"
        );
    }

    #[tokio::test]
    async fn release_while_waiting_fails_the_wait() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = line.events().unwrap();

        let (waited, ()) = tokio::join!(events.next_event(), async move {
            tokio::task::yield_now().await;
            guard.release();
        });

        let err = waited.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotOpen { offset: 20 }));
        assert_eq!(line.state(), LineState::Free);

        // Nothing was pending any more, so the next step reports the line
        // as closed.
        let err = events.next_event().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed { offset: 20 }));
    }

    #[tokio::test]
    async fn cancelled_wait_keeps_the_line_active() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let _guard = line
            .monitor(EdgeDetect::Rising, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = line.events().unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), events.next_event()).await;
        assert!(timed_out.is_err());
        assert_eq!(line.state(), LineState::Active(Mode::Event));

        backend.drive(0, 20, true).unwrap();
        let event = events.next_event().await.unwrap();
        assert_eq!(event.edge(), Edge::Rising);
    }

    #[tokio::test]
    async fn unknown_edge_tag_is_a_decode_error() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let _guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = line.events().unwrap();

        backend.inject_event(0, 20, RawEvent::new(9, 0, 0)).unwrap();
        backend
            .inject_event(0, 20, RawEvent::new(1, 4, 500))
            .unwrap();

        let err = events.next_event().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Decode(9)));

        let event = events.next_event().await.unwrap();
        assert_eq!(event.timestamp(), (4, 500));
    }

    #[tokio::test]
    async fn failed_read_is_reported_and_the_line_stays_active() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let _guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = line.events().unwrap();

        backend.drive(0, 20, true).unwrap();
        backend.fail_next_read(libc::EIO);

        let err = events.next_event().await.unwrap_err();
        match err.kind() {
            ErrorKind::Read { offset, source } => {
                assert_eq!(*offset, 20);
                assert_eq!(source.raw_os_error(), Some(libc::EIO));
            }
            other => panic!("expected a read error, got {other:?}"),
        }
        assert_eq!(line.state(), LineState::Active(Mode::Event));

        let event = events.next_event().await.unwrap();
        assert_eq!(event.edge(), Edge::Rising);
    }

    #[tokio::test]
    async fn unusable_descriptor_is_closed() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let _guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = line.events().unwrap();

        backend.fail_next_event_fd(libc::EBADF);
        let err = events.next_event().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed { offset: 20 }));
        assert_eq!(line.state(), LineState::Active(Mode::Event));

        // Registration is retried on the next step.
        backend.drive(0, 20, true).unwrap();
        let event = events.next_event().await.unwrap();
        assert_eq!(event.value(), LineValue::Active);
    }

    #[test]
    fn polling_outside_a_runtime_is_closed() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let _guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut events = line.events().unwrap();
        backend.drive(0, 20, true).unwrap();

        let err = futures::executor::block_on(events.next_event()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed { offset: 20 }));
        assert_eq!(line.state(), LineState::Active(Mode::Event));
    }

    #[tokio::test]
    async fn streams_do_not_outlive_their_acquisition() {
        let backend = backend();
        let chip = open_chip(&backend);
        let line = chip.line(20);

        let guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        let mut stale = line.events().unwrap();
        drop(guard);

        let _guard = line
            .monitor(EdgeDetect::Both, RequestOptions::new())
            .unwrap()
            .acquire()
            .unwrap();
        backend.drive(0, 20, true).unwrap();

        let err = stale.next().await.unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed { .. }));

        let mut fresh = line.events().unwrap();
        let event = fresh.next().await.unwrap().unwrap();
        assert_eq!(event.value(), LineValue::Active);
    }
}
