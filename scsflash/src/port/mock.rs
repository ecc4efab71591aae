//! In-memory port used by the unit tests.
//!
//! Bytes queued in `rx` are handed out by `read`; once the queue is empty a
//! read fails with `TimedOut`, like an idle serial line. Everything written is
//! appended to `tx`. An optional responder sees every write and may queue a
//! reply, which lets a test script the modem side of a conversation.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{DEFAULT_TIMEOUT, Port};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

pub(crate) struct MockPort {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    /// Every timeout the code under test set, in order.
    pub timeouts: Vec<Duration>,
    timeout: Duration,
    responder: Option<Responder>,
}

impl MockPort {
    pub fn new(response: &[u8]) -> Self {
        Self {
            rx: response
                .iter()
                .copied()
                .collect(),
            tx: Vec::new(),
            timeouts: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            responder: None,
        }
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mut port = Self::new(&[]);
        port.responder = Some(Box::new(responder));
        port
    }

    pub fn written(&self) -> &[u8] {
        &self.tx
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .rx
            .is_empty()
        {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(self.rx.len());
        for (slot, byte) in buf
            .iter_mut()
            .zip(self.rx.drain(..n))
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .extend_from_slice(buf);
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(buf);
            self.rx
                .extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeouts
            .push(timeout);
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
