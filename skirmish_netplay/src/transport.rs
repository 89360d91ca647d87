// Transport seam between the session layer and byte-stream sockets.
//
// Everything above this module talks to a `Transport`: a non-blocking
// `Read + Write` stream that can optionally expose an OS handle for readiness
// polling. `TcpStream` is the production implementation. Reads that would
// block return `WouldBlock`, which callers treat as "no data yet", never as
// a lost connection.
//
// `send_all` is the only place a steady-state send may wait: if the kernel
// buffer is full it retries until `timeout`, so a frame is either written
// whole or reported as failed.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

/// OS-level handle used by `PollSet` (a file descriptor on unix).
pub type RawHandle = i32;

pub trait Transport: Read + Write {
    /// Handle for readiness polling. `None` means the poll set treats this
    /// transport as always ready and leaves it to the non-blocking read.
    fn poll_handle(&self) -> Option<RawHandle>;
}

impl Transport for TcpStream {
    #[cfg(unix)]
    fn poll_handle(&self) -> Option<RawHandle> {
        use std::os::fd::AsRawFd;
        Some(self.as_raw_fd())
    }

    #[cfg(not(unix))]
    fn poll_handle(&self) -> Option<RawHandle> {
        None
    }
}

/// Write all of `bytes`, waiting out `WouldBlock` for at most `timeout`.
pub fn send_all<W: Write + ?Sized>(stream: &mut W, bytes: &[u8], timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out"));
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
    stream.flush()
}

/// In-memory transport for tests: scripted inbound bytes, captured writes.
#[cfg(test)]
pub(crate) mod memory {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::rc::Rc;

    use super::{RawHandle, Transport};

    struct Pipe {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        closed: bool,
        max_read: usize,
    }

    /// Cloning shares the pipe, so a test keeps a handle to a transport it
    /// has handed to a socket.
    #[derive(Clone)]
    pub(crate) struct MemoryTransport(Rc<RefCell<Pipe>>);

    impl MemoryTransport {
        pub(crate) fn new() -> Self {
            Self::with_max_read(usize::MAX)
        }

        /// Each `read` returns at most `max_read` bytes.
        pub(crate) fn with_max_read(max_read: usize) -> Self {
            Self(Rc::new(RefCell::new(Pipe {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                closed: false,
                max_read,
            })))
        }

        pub(crate) fn push(&self, bytes: &[u8]) {
            self.0.borrow_mut().inbound.extend(bytes);
        }

        /// Peer hangs up: reads return 0 once the inbound queue is drained.
        pub(crate) fn close(&self) {
            self.0.borrow_mut().closed = true;
        }

        pub(crate) fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut self.0.borrow_mut().outbound)
        }
    }

    impl Read for MemoryTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut pipe = self.0.borrow_mut();
            if pipe.inbound.is_empty() {
                return if pipe.closed {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(pipe.max_read).min(pipe.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(pipe.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MemoryTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut pipe = self.0.borrow_mut();
            if pipe.closed {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            pipe.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for MemoryTransport {
        fn poll_handle(&self) -> Option<RawHandle> {
            None
        }
    }
}
