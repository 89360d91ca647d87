// Buffered socket: reassembles whole messages from a non-blocking stream.
//
// Each connection owns one fixed `NET_BUFFER_SIZE` buffer holding the unread
// window `[start, start + bytes)`. `fill` appends whatever the transport has
// (only when the window is anchored at offset 0, so appends are always
// contiguous), and `extract_message` peels complete frames off the front. A
// partial frame left behind by `extract_message` is moved to offset 0 before
// returning, which is what lets the next `fill` run.
//
// A peer that declares a frame larger than the buffer can never be parsed.
// The header is logged and exactly the declared frame length is skipped, so
// the stream stays in sync if the peer really did send that many bytes.

use std::io;
use std::time::Duration;

use skirmish_protocol::{Message, MessageHeader, NET_BUFFER_SIZE};
use tracing::{debug, warn};

use crate::transport::{Transport, send_all};

pub struct BufferedSocket<T> {
    socket: Option<T>,
    buffer: Box<[u8; NET_BUFFER_SIZE]>,
    start: usize,
    bytes: usize,
    /// Bytes of an oversized frame still to be skipped.
    discard: usize,
}

impl<T: Transport> BufferedSocket<T> {
    pub fn new(socket: T) -> Self {
        Self {
            socket: Some(socket),
            buffer: Box::new([0; NET_BUFFER_SIZE]),
            start: 0,
            bytes: 0,
            discard: 0,
        }
    }

    pub fn socket(&self) -> Option<&T> {
        self.socket.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    /// Drop the transport. Already-buffered bytes stay extractable.
    pub fn close(&mut self) {
        self.socket = None;
    }

    /// Unread bytes in the buffer.
    pub fn buffered(&self) -> usize {
        self.bytes
    }

    /// The unread window, for callers that consume a raw prefix before
    /// switching to framed messages.
    pub fn peek(&self) -> &[u8] {
        &self.buffer[self.start..self.start + self.bytes]
    }

    /// Drop the first `n` unread bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.bytes);
        self.start += n;
        self.bytes -= n;
        if self.bytes == 0 {
            self.start = 0;
        }
    }

    /// Read once from the transport into the free tail of the buffer.
    /// Returns true if bytes arrived. End of stream or a hard error closes
    /// the socket; `WouldBlock` just means nothing was pending.
    pub fn fill(&mut self) -> bool {
        if self.start != 0 || self.bytes == NET_BUFFER_SIZE {
            return false;
        }
        let fill_mark = self.bytes;
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        match socket.read(&mut self.buffer[fill_mark..]) {
            Ok(0) => {
                debug!("peer closed connection");
                self.socket = None;
                false
            }
            Ok(n) => {
                self.bytes += n;
                true
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => false,
            Err(e) => {
                debug!(error = %e, "receive failed, closing connection");
                self.socket = None;
                false
            }
        }
    }

    /// Take the next complete message from the buffer, if one is there.
    pub fn extract_message(&mut self) -> Option<Message> {
        loop {
            if self.discard > 0 {
                let skip = self.discard.min(self.bytes);
                self.consume(skip);
                self.discard -= skip;
                if self.discard > 0 {
                    return None;
                }
            }

            let window = &self.buffer[self.start..self.start + self.bytes];
            let Some(header) = MessageHeader::decode(window) else {
                self.compact();
                return None;
            };
            let total = header.frame_len();
            if !header.fits_buffer() {
                warn!(
                    size = header.size,
                    kind = header.kind,
                    source = header.source,
                    "discarding frame larger than the receive buffer"
                );
                self.discard = total;
                continue;
            }
            if total > self.bytes {
                self.compact();
                return None;
            }

            let message = Message::from_frame(&window[..total]);
            self.consume(total);
            if message.is_some() {
                return message;
            }
        }
    }

    /// Write one encoded frame. A failed send closes the socket.
    pub fn send_frame(&mut self, frame: &[u8], timeout: Duration) -> io::Result<()> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let result = send_all(socket, frame, timeout);
        if result.is_err() {
            self.socket = None;
        }
        result
    }

    fn compact(&mut self) {
        if self.start != 0 {
            self.buffer.copy_within(self.start..self.start + self.bytes, 0);
            self.start = 0;
        }
    }
}
