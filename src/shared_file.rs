//! Shared streaming file.
//!
//! A file-backed append-only buffer with one writer and N concurrent
//! blocking readers. Readers track the writer's advancing `length` and
//! block on a condition variable when they catch up, rather than racing the
//! writer for bytes past the visibility fence.
//!
//! A direct translation of `original_source/response_cache/shared_file.go`:
//! the same reference-counting discipline (`reference`/`unreference`) and
//! the same "positional read, block on condvar if nothing available yet,
//! never return EOF while the writer might still append" reader loop.
//! `parking_lot::Mutex`/`Condvar` stand in for Go's `sync.Cond` (both are
//! already teacher dependencies).

use crate::error::CacheError;
use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

struct Inner {
    file: File,
    length: u64,
    refs: u64,
    /// `None` while still open; `Some(Ok(()))` on a clean writer close,
    /// `Some(Err(_))` on abort/IO failure.
    terminal: Option<Result<(), CacheError>>,
}

/// Shared ownership of a single append-only file between one writer and any
/// number of readers. The file handle is closed exactly when the last
/// holder (writer or reader) releases its reference.
pub struct SharedStreamingFile {
    state: Mutex<Inner>,
    cond: Condvar,
}

impl SharedStreamingFile {
    /// Wrap `file` as a fresh shared streaming file with one reference held
    /// by the writer.
    pub fn new(file: File) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Inner { file, length: 0, refs: 1, terminal: None }),
            cond: Condvar::new(),
        })
    }

    /// Append `buf` to the file, advance `length`, and wake any waiting
    /// readers. An IO error here marks the shared file terminally failed,
    /// as later reads would otherwise stall forever.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        let result = state.file.write_all(buf).map(|_| buf.len());
        match &result {
            Ok(n) => state.length += *n as u64,
            Err(e) => {
                let err = CacheError::io(e);
                state.terminal.get_or_insert(Err(err));
            }
        }
        self.cond.notify_all();
        result
    }

    /// Flush pending bytes to durable storage. Failure is terminal.
    pub fn sync(&self) -> io::Result<()> {
        let result = {
            let state = self.state.lock();
            state.file.sync_all()
        };
        if let Err(e) = &result {
            self.abort(CacheError::io(e));
        }
        result
    }

    /// Attach a new reader, incrementing the reference count. Fails if the
    /// shared file has already been fully released (every holder,
    /// including the writer, has detached).
    pub fn spawn_reader(self: &Arc<Self>) -> Result<SharedFileReader, CacheError> {
        let mut state = self.state.lock();
        if state.refs == 0 {
            return Err(CacheError::NotFound);
        }
        state.refs += 1;
        Ok(SharedFileReader { shared: Arc::clone(self), position: 0 })
    }

    /// Mark the writer side successfully finished, wake all readers, and
    /// release the writer's reference.
    pub fn close_writer(&self) {
        let mut state = self.state.lock();
        state.terminal.get_or_insert(Ok(()));
        Self::unreference(&mut state);
        self.cond.notify_all();
    }

    /// Mark the shared file terminally failed, wake all readers, and
    /// release the writer's reference.
    pub fn abort(&self, err: CacheError) {
        let mut state = self.state.lock();
        state.terminal = Some(Err(err));
        Self::unreference(&mut state);
        self.cond.notify_all();
    }

    pub fn length(&self) -> u64 {
        self.state.lock().length
    }

    fn unreference(state: &mut Inner) {
        state.refs = state.refs.saturating_sub(1);
    }

    fn wait_for_more(&self, position: u64) -> WaitOutcome {
        let mut state = self.state.lock();
        loop {
            if state.length > position {
                return WaitOutcome::Ready;
            }
            match &state.terminal {
                None => self.cond.wait(&mut state),
                Some(Ok(())) => return WaitOutcome::Eof,
                Some(Err(e)) => return WaitOutcome::Failed(e.clone()),
            }
        }
    }
}

enum WaitOutcome {
    Ready,
    Eof,
    Failed(CacheError),
}

/// A reader attached to a [`SharedStreamingFile`]. Detaching (via `Drop`)
/// decrements the reference count; the underlying file is closed when the
/// last holder detaches.
pub struct SharedFileReader {
    shared: Arc<SharedStreamingFile>,
    position: u64,
}

impl SharedFileReader {
    /// Read into `buf`. Never returns `Ok(0)` while the writer might still
    /// append more — it blocks instead — except at true EOF (writer closed
    /// successfully and there is nothing left to read).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, CacheError> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let bread = {
                let state = self.shared.state.lock();
                state.file.read_at(buf, self.position).map_err(CacheError::from)?
            };
            if bread > 0 {
                self.position += bread as u64;
                return Ok(bread);
            }

            match self.shared.wait_for_more(self.position) {
                WaitOutcome::Ready => continue,
                WaitOutcome::Eof => return Ok(0),
                WaitOutcome::Failed(e) => return Err(e),
            }
        }
    }
}

impl Drop for SharedFileReader {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        SharedStreamingFile::unreference(&mut state);
    }
}

/// Lets a reader be handed to anything generic over [`std::io::Read`] (e.g.
/// [`crate::header_codec::EntryHeader::decode_from`]), on top of the
/// `CacheError`-returning inherent `read` used for the body-streaming loop.
impl io::Read for SharedFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SharedFileReader::read(self, buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn tempfile() -> File {
        tempfile::tempfile().unwrap()
    }

    #[test]
    fn reader_sees_bytes_written_before_it_attached() {
        let shared = SharedStreamingFile::new(tempfile());
        shared.write(b"hello").unwrap();
        shared.close_writer();

        let mut reader = shared.spawn_reader().unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn reader_blocks_then_observes_new_bytes_and_then_eof() {
        let shared = SharedStreamingFile::new(tempfile());
        let mut reader = shared.spawn_reader().unwrap();

        let writer_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            writer_shared.write(b"part1").unwrap();
            thread::sleep(Duration::from_millis(30));
            writer_shared.write(b"part2").unwrap();
            writer_shared.close_writer();
        });

        let mut buf = [0u8; 16];
        let n1 = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n1], b"part1");

        let n2 = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n2], b"part2");

        let n3 = reader.read(&mut buf).unwrap();
        assert_eq!(n3, 0); // EOF

        handle.join().unwrap();
    }

    #[test]
    fn reader_wakes_with_failure_reason() {
        let shared = SharedStreamingFile::new(tempfile());
        let mut reader = shared.spawn_reader().unwrap();

        let writer_shared = Arc::clone(&shared);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer_shared.abort(CacheError::Io("disk full".to_string()));
        });

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(err, CacheError::Io(msg) if msg == "disk full"));
    }

    #[test]
    fn length_never_decreases() {
        let shared = SharedStreamingFile::new(tempfile());
        shared.write(b"abc").unwrap();
        let l1 = shared.length();
        shared.write(b"def").unwrap();
        let l2 = shared.length();
        assert!(l2 >= l1);
        assert_eq!(l2, 6);
    }

    #[test]
    fn spawn_reader_fails_once_fully_released() {
        let shared = SharedStreamingFile::new(tempfile());
        shared.close_writer();
        // the writer's own release already brought refs to 0 since no
        // reader ever attached
        assert!(shared.spawn_reader().is_err());
    }
}
