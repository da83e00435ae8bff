use mio::{event::Event, Token};
use std::fmt;

/// Owned copy of one readiness notification.
///
/// Events are copied out of `mio::Events` before any of them is handled so
/// that handling can borrow the server mutably.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    token: Token,
    is_readable: bool,
    is_writable: bool,
    is_closed: bool,
    is_error: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("is_readable", &self.is_readable)
            .field("is_writable", &self.is_writable)
            .field("is_closed", &self.is_closed)
            .field("is_error", &self.is_error)
            .finish()
    }
}

impl Readiness {
    pub fn new(token: Token, readable: bool, writable: bool) -> Self {
        Self {
            token,
            is_readable: readable,
            is_writable: writable,
            is_closed: false,
            is_error: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.is_readable
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    /// Peer hung up either half of the stream.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            is_readable: event.is_readable(),
            is_writable: event.is_writable(),
            is_closed: event.is_read_closed() || event.is_write_closed(),
            is_error: event.is_error(),
        }
    }
}
