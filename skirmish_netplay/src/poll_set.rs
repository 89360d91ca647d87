// Readiness poll over a set of transports.
//
// One `check` per tick batches the liveness test for every registered
// socket. Entries are keyed by a caller-chosen token (the connection slot).
// On unix this is a single `poll(2)`; a readable socket and a socket whose
// peer hung up both come back ready, and the subsequent read tells them
// apart. Entries without an OS handle, and every entry on other platforms,
// are reported ready unconditionally; the non-blocking read then decides.

use std::io;
use std::time::Duration;

use crate::transport::RawHandle;

#[derive(Debug)]
struct PollEntry {
    token: usize,
    handle: Option<RawHandle>,
    ready: bool,
}

#[derive(Debug)]
pub struct PollSet {
    entries: Vec<PollEntry>,
    capacity: usize,
}

impl PollSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Register `token`, replacing any earlier registration under it.
    /// Returns false when the set is full.
    pub fn add(&mut self, token: usize, handle: Option<RawHandle>) -> bool {
        self.remove(token);
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(PollEntry {
            token,
            handle,
            ready: false,
        });
        true
    }

    pub fn remove(&mut self, token: usize) {
        self.entries.retain(|e| e.token != token);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Refresh readiness of every entry, waiting at most `timeout` for the
    /// first one. Returns how many entries are ready.
    pub fn check(&mut self, timeout: Duration) -> io::Result<usize> {
        for entry in &mut self.entries {
            entry.ready = entry.handle.is_none();
        }
        self.poll_handles(timeout)?;
        Ok(self.entries.iter().filter(|e| e.ready).count())
    }

    /// Readiness from the last `check`. Unknown tokens are not ready.
    pub fn is_ready(&self, token: usize) -> bool {
        self.entries.iter().any(|e| e.token == token && e.ready)
    }

    #[cfg(unix)]
    fn poll_handles(&mut self, timeout: Duration) -> io::Result<()> {
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .filter_map(|e| e.handle)
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        if fds.is_empty() {
            return Ok(());
        }
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        // SAFETY: `fds` is an exclusively borrowed, initialised buffer of
        // exactly `fds.len()` pollfd records for the duration of the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        let polled = self.entries.iter_mut().filter(|e| e.handle.is_some());
        for (entry, fd) in polled.zip(&fds) {
            entry.ready = fd.revents != 0;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn poll_handles(&mut self, _timeout: Duration) -> io::Result<()> {
        for entry in &mut self.entries {
            entry.ready = true;
        }
        Ok(())
    }
}
