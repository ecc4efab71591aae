//! Blocking read helpers on top of [`Port`].
//!
//! Every helper treats a read that times out, or returns no data, as
//! [`Error::ChannelTimeout`]. Nothing here retries.

use std::io::ErrorKind;
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;

/// Result of [`read_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    /// The full pattern was received.
    Prompt,
    /// A line ended before the pattern was seen. Trailing `\r\n` is removed.
    Line(Vec<u8>),
}

fn read_some<P: Port + ?Sized>(port: &mut P, buf: &mut [u8], what: &'static str) -> Result<usize> {
    match port.read(buf) {
        Ok(0) => Err(Error::ChannelTimeout {
            waiting_for: what,
        }),
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            Err(Error::ChannelTimeout {
                waiting_for: what,
            })
        },
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Read a single byte.
pub fn read_byte<P: Port + ?Sized>(port: &mut P, what: &'static str) -> Result<u8> {
    let mut buf = [0u8; 1];
    loop {
        if read_some(port, &mut buf, what)? == 1 {
            trace!("<- {:#04X} ({what})", buf[0]);
            return Ok(buf[0]);
        }
    }
}

/// Fill `buf` completely.
pub fn read_exact<P: Port + ?Sized>(port: &mut P, buf: &mut [u8], what: &'static str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        filled += read_some(port, &mut buf[filled..], what)?;
    }
    trace!("<- {:02X?} ({what})", buf);
    Ok(())
}

/// Discard incoming bytes until the line stays quiet for `window`.
///
/// The port timeout is switched to `window` for the duration of the call and
/// restored afterwards. Returns the number of bytes thrown away.
pub fn drain<P: Port + ?Sized>(port: &mut P, window: Duration) -> Result<usize> {
    let saved = port.timeout();
    port.set_timeout(window)?;

    let mut discarded = 0;
    let mut buf = [0u8; 64];
    let outcome = loop {
        match port.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => discarded += n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                break Ok(());
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => break Err(Error::Io(e)),
        }
    };

    port.set_timeout(saved)?;
    outcome?;

    trace!("Drained {discarded} bytes");
    Ok(discarded)
}

/// Read until `pattern` appears or a line ends.
///
/// The pattern is matched with a rolling prefix counter, so it is recognised
/// at any position in the stream, including in the middle of a line. A `\n`
/// that is not itself part of the match in progress closes the current line
/// instead.
pub fn read_until<P: Port + ?Sized>(port: &mut P, pattern: &[u8]) -> Result<Captured> {
    let mut line = Vec::new();
    let mut matched = 0;

    loop {
        let byte = read_byte(port, "modem response")?;

        if matched < pattern.len() && byte == pattern[matched] {
            matched += 1;
            if matched == pattern.len() {
                return Ok(Captured::Prompt);
            }
        } else {
            matched = usize::from(pattern.first() == Some(&byte));
            if matched == pattern.len() {
                return Ok(Captured::Prompt);
            }
        }

        if byte == b'\n' && matched == 0 {
            while matches!(line.last(), Some(b'\r' | b'\n')) {
                line.pop();
            }
            return Ok(Captured::Line(line));
        }
        line.push(byte);
    }
}
