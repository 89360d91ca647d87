// Chunked file transfer over FILE_MSG messages.
//
// One transfer in flight per direction. The sender measures the file with a
// full read pass, rewinds, then emits one chunk per call:
//
//   i32 total, i32 chunk_bytes, i32 start_offset, string(256) name, bytes
//
// The receiver opens the destination on the chunk starting at offset zero,
// appends every chunk, and closes once `start + chunk_bytes` reaches the
// total. Both sides report integer progress `(start + chunk_bytes) * 100 /
// total`, with an empty file reported as 100.
//
// Starting a new transfer while one is active replaces it; the abandoned one
// is logged and its handle closed.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use skirmish_protocol::{FILE_MSG, Message, MessageKind, MessageReader, MessageWriter};
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};

/// Payload bytes per chunk.
pub const FILE_CHUNK_SIZE: usize = 256;

/// Bound on the file name carried in each chunk.
pub const MAX_FILENAME_LEN: usize = 256;

/// Where transferred files are read from and written to.
pub trait Storage {
    type Reader: Read + Seek;
    type Writer: Write;

    fn open_read(&self, name: &str) -> io::Result<Self::Reader>;
    fn open_write(&self, name: &str) -> io::Result<Self::Writer>;
}

/// Storage rooted at a directory. Names are relative paths below the root;
/// absolute paths and `..` components are refused.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let confined = relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !confined {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file name {name:?} escapes the storage root"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for FsStorage {
    type Reader = File;
    type Writer = File;

    fn open_read(&self, name: &str) -> io::Result<File> {
        File::open(self.resolve(name)?)
    }

    fn open_write(&self, name: &str) -> io::Result<File> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        File::create(path)
    }
}

/// Integer percentage of `done` over `total`. An empty transfer is complete.
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

struct Outgoing<R> {
    name: String,
    reader: R,
    total: u64,
    offset: u64,
}

pub struct FileSender<S: Storage> {
    current: Option<Outgoing<S::Reader>>,
}

impl<S: Storage> Default for FileSender<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Storage> FileSender<S> {
    pub fn new() -> Self {
        Self { current: None }
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Produce the next chunk of `name`, opening it first when `new_file` is
    /// set. Returns the FILE_MSG addressed to `destination` and the progress
    /// after this chunk.
    pub fn next_chunk(&mut self, storage: &S, new_file: bool, name: &str, destination: u8) -> NetResult<(Message, u8)> {
        if new_file {
            if let Some(old) = self.current.take() {
                warn!(abandoned = %old.name, at = old.offset, of = old.total, "new file transfer replaces unfinished one");
            }
            self.current = Some(Self::open(storage, name)?);
        }
        let outgoing = self
            .current
            .as_mut()
            .ok_or_else(|| NetError::Protocol(format!("no transfer of {name} in progress")))?;

        let mut chunk = [0u8; FILE_CHUNK_SIZE];
        let read = read_up_to(&mut outgoing.reader, &mut chunk)?;
        let end = outgoing.offset + read as u64;
        if end > outgoing.total || (read == 0 && end < outgoing.total) {
            return Err(NetError::Protocol(format!("{} changed size during transfer", outgoing.name)));
        }

        let total = wire_i32(outgoing.total)?;
        let start = wire_i32(outgoing.offset)?;
        let mut w = MessageWriter::begin(MessageKind::Application(FILE_MSG), destination);
        w.i32(total)?
            .i32(read as i32)?
            .i32(start)?
            .string(&outgoing.name, MAX_FILENAME_LEN)?
            .bin(&chunk[..read])?;
        outgoing.offset = end;
        let progress = progress_percent(outgoing.offset, outgoing.total);

        if outgoing.offset == outgoing.total {
            debug!(file = %outgoing.name, bytes = outgoing.total, "file sent");
            self.current = None;
        }
        Ok((w.end(), progress))
    }

    fn open(storage: &S, name: &str) -> NetResult<Outgoing<S::Reader>> {
        let mut reader = storage.open_read(name)?;
        let mut total = 0u64;
        let mut scratch = [0u8; FILE_CHUNK_SIZE];
        loop {
            match reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => total += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        wire_i32(total)?;
        reader.seek(SeekFrom::Start(0))?;
        debug!(file = %name, bytes = total, "file transfer started");
        Ok(Outgoing {
            name: name.to_owned(),
            reader,
            total,
            offset: 0,
        })
    }
}

struct Incoming<W> {
    name: String,
    writer: W,
}

pub struct FileReceiver<S: Storage> {
    current: Option<Incoming<S::Writer>>,
}

impl<S: Storage> Default for FileReceiver<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Storage> FileReceiver<S> {
    pub fn new() -> Self {
        Self { current: None }
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Apply one FILE_MSG chunk and return the progress after it.
    pub fn accept_chunk(&mut self, storage: &S, message: &Message) -> NetResult<u8> {
        if message.kind() != MessageKind::Application(FILE_MSG) {
            return Err(NetError::Protocol(format!("{:?} is not a file chunk", message.kind())));
        }
        let mut r = MessageReader::begin(message);
        let total = r.i32()?;
        let read = r.i32()?;
        let start = r.i32()?;
        let name = r.string(MAX_FILENAME_LEN)?;
        let end = start.checked_add(read);
        let sane = total >= 0
            && (0..=FILE_CHUNK_SIZE as i32).contains(&read)
            && start >= 0
            && end.is_some_and(|e| e <= total);
        let end = match end {
            Some(end) if sane => end,
            _ => {
                return Err(NetError::Protocol(format!(
                    "bad chunk header for {name}: total {total}, chunk {read}, start {start}"
                )));
            }
        };
        let data = r.bin(read as usize)?;

        if start == 0 {
            if let Some(old) = self.current.take() {
                warn!(abandoned = %old.name, "new incoming file replaces unfinished one");
            }
            self.current = Some(Incoming {
                writer: storage.open_write(&name)?,
                name: name.clone(),
            });
        }
        let incoming = self
            .current
            .as_mut()
            .ok_or_else(|| NetError::Protocol(format!("chunk of {name} without an open transfer")))?;
        if incoming.name != name {
            return Err(NetError::Protocol(format!(
                "chunk of {name} while receiving {}",
                incoming.name
            )));
        }
        incoming.writer.write_all(data)?;

        if end == total {
            incoming.writer.flush()?;
            debug!(file = %name, bytes = total, "file received");
            self.current = None;
        }
        Ok(progress_percent(end as u64, total as u64))
    }
}

fn wire_i32(value: u64) -> NetResult<i32> {
    i32::try_from(value).map_err(|_| NetError::Protocol(format!("file of {value} bytes is too large to transfer")))
}

/// Fill `buf` as far as the reader allows, stopping early only at EOF.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
