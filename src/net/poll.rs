use std::{io, sync::Arc, time::Duration};

use mio::{event::Source, Events, Interest, Poll, Registry, Token, Waker};

/// Poll instance plus the waker that interrupts it from other threads.
pub struct PollHandle {
    poller: Poll,
    waker: Arc<Waker>,
}

impl PollHandle {
    pub fn new(waker_token: Token) -> io::Result<Self> {
        let poller = Poll::new()?;
        let waker = Waker::new(poller.registry(), waker_token)?;
        Ok(PollHandle {
            poller,
            waker: Arc::new(waker),
        })
    }

    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poller.registry().register(source, token, interest)
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poller.registry().deregister(source)
    }

    pub fn registry(&self) -> &Registry {
        self.poller.registry()
    }

    /// Waits for readiness; `EINTR` is reported as zero events.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        match self.poller.poll(events, timeout) {
            Ok(()) => Ok(events.iter().count()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                events.clear();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}
