//! Per-service control FIFO and its line protocol
//!
//! External actors write newline-terminated requests to `<name>/kill`:
//! a signal short-name (`TERM`, `hup`, ...) or a decimal signal number.
//! The supervisor keeps the write end open itself, so an idle FIFO reads
//! as "no data" instead of end-of-file and never polls readable on hangup.

use libc::c_int;
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;

use crate::signals;

/// Bytes of undelimited input kept between reads
pub const LINE_CAPACITY: usize = 16;

/// Byte substituted for NUL in received data
const NUL_REPLACEMENT: u8 = b'?';

/// Outcome of one parse attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// A complete line naming a signal number (always > 0)
    Signal(c_int),
    /// A complete line that is overflowed, unknown or malformed
    Invalid,
    /// No complete line is available yet
    Pending,
}

/// Fixed-capacity buffer holding the unterminated tail of the input
#[derive(Debug)]
pub struct LineBuffer {
    buf: [u8; LINE_CAPACITY],
    len: usize,
    overflowed: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
            overflowed: false,
        }
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Produce the next request, reading from `src` only while no newline is buffered.
    ///
    /// A line that outgrows the buffer is consumed to its newline and then
    /// reported as [`Request::Invalid`]. Read errors other than
    /// `WouldBlock` and `Interrupted` are returned to the caller.
    pub fn next_request<R: Read>(&mut self, src: &mut R) -> io::Result<Request> {
        loop {
            if let Some(end) = self.buf[..self.len].iter().position(|&b| b == b'\n') {
                return Ok(self.take_line(end));
            }
            if self.len == LINE_CAPACITY {
                self.overflowed = true;
                self.len = 0;
            }
            let n = match src.read(&mut self.buf[self.len..]) {
                Ok(0) => return Ok(Request::Pending),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Request::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            for b in &mut self.buf[self.len..self.len + n] {
                if *b == 0 {
                    *b = NUL_REPLACEMENT;
                }
            }
            self.len += n;
        }
    }

    fn take_line(&mut self, end: usize) -> Request {
        let request = if self.overflowed {
            Request::Invalid
        } else {
            signals::lookup(&self.buf[..end]).map_or(Request::Invalid, Request::Signal)
        };
        self.buf.copy_within(end + 1..self.len, 0);
        self.len -= end + 1;
        self.overflowed = false;
        request
    }
}

/// The FIFO descriptor pair plus its line buffer
#[derive(Debug)]
pub struct ControlChannel {
    reader: File,
    // Held only to keep the FIFO from reporting end-of-file
    _writer: OwnedFd,
    lines: LineBuffer,
}

impl ControlChannel {
    /// Create the FIFO at `path` if needed and open both ends.
    ///
    /// The read end is opened first, non-blocking, so the open does not wait
    /// for a writer; the write end then succeeds immediately.
    pub fn open(path: &Path) -> nix::Result<Self> {
        match mkfifo(path, Mode::from_bits_truncate(0o777)) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(e) => return Err(e),
        }
        let reader = open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC, Mode::empty())?;
        let writer = open(path, OFlag::O_WRONLY | OFlag::O_CLOEXEC, Mode::empty())?;
        Ok(Self {
            reader: File::from(reader),
            _writer: writer,
            lines: LineBuffer::new(),
        })
    }

    /// Descriptor to wait on for readability
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    pub fn next_request(&mut self) -> io::Result<Request> {
        self.lines.next_request(&mut self.reader)
    }
}
