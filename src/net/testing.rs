//! Scripted in-memory transport for connection and registry tests.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::net::connection::Transport;

#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct MockState {
    reads: VecDeque<ReadStep>,
    written: Vec<u8>,
    write_limit: Option<usize>,
    would_block_after: Option<usize>,
    successful_writes: usize,
    write_error: Option<io::ErrorKind>,
    shut_down: bool,
}

/// Cloning shares the state, so a test keeps a handle after moving the stream.
#[derive(Debug, Clone, Default)]
pub struct MockStream {
    state: Arc<Mutex<MockState>>,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn push_read(&self, step: ReadStep) {
        self.state().reads.push_back(step);
    }

    pub fn pending_reads(&self) -> usize {
        self.state().reads.len()
    }

    /// Caps the bytes accepted by each write call.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state().write_limit = limit;
    }

    /// Writes block once this many write calls have succeeded.
    pub fn set_would_block_after(&self, calls: Option<usize>) {
        let mut state = self.state();
        state.would_block_after = calls;
        state.successful_writes = 0;
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state().write_error = Some(kind);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        match state.reads.pop_front() {
            None | Some(ReadStep::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Error(kind)) => Err(kind.into()),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.reads.push_front(ReadStep::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }
        if let Some(limit) = state.would_block_after {
            if state.successful_writes >= limit {
                return Err(io::ErrorKind::WouldBlock.into());
            }
        }
        let n = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        state.successful_writes += 1;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {
    fn close_transport(&mut self) -> io::Result<()> {
        self.state().shut_down = true;
        Ok(())
    }
}
