//! Circular debug log ("cbuf").
//!
//! A fixed-capacity byte ring that every debug print lands in. Entries are
//! written back to back and followed by `END_MARKER`, so a memory dump can
//! be searched for the newest write. When an entry does not fit before the
//! end of the buffer, the tail is zeroed and writing restarts at offset 0;
//! an entry never straddles the wrap point.
//!
//! The ring is guarded by a `Spinlock` and may be written from contexts
//! that cannot block. Saving copies the ring out under the lock and does
//! the I/O afterwards.

use alloc::vec::Vec;
use core::fmt::{self, Write};

use crate::constants::{CBUF_FILLER, END_MARKER, MAX_LINE_LENGTH, TRUNC_MARKER};
use crate::error::SplError;
use crate::Spinlock;

/// Bytes written after every entry, before the end marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// Caller supplies its own newlines
    Empty,
    /// `\r\n`, for dumps read with Windows tools
    CrLf,
}

impl LineEnding {
    #[cfg(not(feature = "windows-line-endings"))]
    pub const DEFAULT: LineEnding = LineEnding::Empty;
    #[cfg(feature = "windows-line-endings")]
    pub const DEFAULT: LineEnding = LineEnding::CrLf;

    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Empty => b"",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Outcome of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    Written,
    /// Entry was cut to fit; the kept part was written
    Truncated,
}

/// Destination for saved log bytes
pub trait CbufSink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SplError>;
}

impl CbufSink for Vec<u8> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SplError> {
        self.try_reserve(bytes.len())
            .map_err(|_| SplError::OutOfMemory)?;
        self.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(any(test, feature = "std"))]
impl CbufSink for std::fs::File {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SplError> {
        std::io::Write::write_all(self, bytes).map_err(|_| SplError::WriteFailed)
    }
}

/// Creates (or truncates) a named sink
pub trait DumpTarget {
    type Sink: CbufSink;

    fn create(&self, path: &str) -> Result<Self::Sink, SplError>;
}

/// Plain files on the host filesystem
#[cfg(any(test, feature = "std"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTarget;

#[cfg(any(test, feature = "std"))]
impl DumpTarget for FileTarget {
    type Sink = std::fs::File;

    fn create(&self, path: &str) -> Result<Self::Sink, SplError> {
        std::fs::File::create(path).map_err(|err| {
            log::warn!("cbuf: unable to create {}: {}", path, err);
            SplError::OpenFailed
        })
    }
}

struct Ring {
    buf: Vec<u8>,
    /// Offset of the end marker of the newest entry
    cursor: usize,
    line_ending: LineEnding,
}

impl Ring {
    fn overhead(&self) -> usize {
        END_MARKER.len() + self.line_ending.as_bytes().len()
    }

    fn append(&mut self, line: &[u8]) -> AppendStatus {
        let capacity = self.buf.len();
        let overhead = self.overhead();

        let (line, status) = if line.len() + overhead > capacity {
            (&line[..capacity - overhead], AppendStatus::Truncated)
        } else {
            (line, AppendStatus::Written)
        };

        if self.cursor + line.len() + overhead >= capacity {
            self.buf[self.cursor..].fill(0);
            self.cursor = 0;
        }

        let ending = self.line_ending.as_bytes();
        let start = self.cursor;
        let end = start + line.len();
        let marker_at = end + ending.len();

        // Marker goes down before the payload
        self.buf[marker_at..marker_at + END_MARKER.len()].copy_from_slice(END_MARKER);
        self.buf[start..end].copy_from_slice(line);
        self.buf[end..marker_at].copy_from_slice(ending);
        self.cursor = marker_at;

        status
    }
}

enum State {
    Uninitialized,
    Active(Ring),
    Destroyed,
}

/// Spinlock-protected circular debug log
pub struct DebugLog {
    state: Spinlock<State>,
}

impl DebugLog {
    pub const fn new() -> Self {
        Self {
            state: Spinlock::new(State::Uninitialized),
        }
    }

    /// Allocate `capacity` bytes filled with `\n` and start logging at 0.
    ///
    /// Allocation happens before the spinlock is taken. A destroyed log may
    /// be initialized again.
    pub fn init(&self, capacity: usize, line_ending: LineEnding) -> Result<(), SplError> {
        if capacity <= END_MARKER.len() + line_ending.as_bytes().len() {
            return Err(SplError::InvalidArgument);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| SplError::OutOfMemory)?;
        buf.resize(capacity, CBUF_FILLER);

        let mut state = self.state.lock();
        if let State::Active(_) = *state {
            return Err(SplError::AlreadyActive);
        }
        *state = State::Active(Ring {
            buf,
            cursor: 0,
            line_ending,
        });
        Ok(())
    }

    /// Free the buffer. No appends may be in flight.
    pub fn shutdown(&self) -> Result<(), SplError> {
        let previous = {
            let mut state = self.state.lock();
            if !matches!(*state, State::Active(_)) {
                return Err(SplError::NotActive);
            }
            core::mem::replace(&mut *state, State::Destroyed)
        };
        drop(previous);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock(), State::Active(_))
    }

    pub fn capacity(&self) -> Option<usize> {
        match &*self.state.lock() {
            State::Active(ring) => Some(ring.buf.len()),
            _ => None,
        }
    }

    /// Offset of the newest end marker.
    pub fn cursor(&self) -> Option<usize> {
        match &*self.state.lock() {
            State::Active(ring) => Some(ring.cursor),
            _ => None,
        }
    }

    /// Append one entry followed by the line ending and the end marker.
    pub fn append(&self, line: &[u8]) -> Result<AppendStatus, SplError> {
        match &mut *self.state.lock() {
            State::Active(ring) => Ok(ring.append(line)),
            _ => Err(SplError::NotActive),
        }
    }

    /// Format `0x<thread>: <args>` into a bounded stack buffer and append.
    ///
    /// Output beyond `MAX_LINE_LENGTH` is replaced by `TRUNC\n`.
    pub fn format_and_append(
        &self,
        thread_id: usize,
        args: fmt::Arguments<'_>,
    ) -> Result<AppendStatus, SplError> {
        let mut line = LineBuf::new();
        let overflowed =
            write!(line, "{:#x}: ", thread_id).is_err() || line.write_fmt(args).is_err();
        if overflowed {
            line.mark_truncated();
        }

        let status = self.append(line.as_bytes())?;
        Ok(if overflowed {
            AppendStatus::Truncated
        } else {
            status
        })
    }

    /// Write the log oldest entry first: the bytes after the newest end
    /// marker, then the bytes before it.
    pub fn save_to<S: CbufSink>(&self, sink: &mut S) -> Result<(), SplError> {
        let (image, cursor) = self.copy_out()?;
        let (older, newer) = ordered_segments(&image, cursor);
        sink.write_all(older)?;
        sink.write_all(newer)
    }

    /// Create `path` on `target` and save the log there.
    pub fn save_to_file<T: DumpTarget>(&self, target: &T, path: &str) -> Result<(), SplError> {
        // An inactive log must not create the file
        let (image, cursor) = self.copy_out()?;
        let mut sink = target.create(path)?;
        let (older, newer) = ordered_segments(&image, cursor);
        sink.write_all(older)?;
        sink.write_all(newer)?;
        log::info!("cbuf: saved {} bytes to {}", older.len() + newer.len(), path);
        Ok(())
    }

    /// Write the whole ring as it sits in memory, without reordering.
    pub fn save_raw<S: CbufSink>(&self, sink: &mut S) -> Result<(), SplError> {
        let (image, _) = self.copy_out()?;
        sink.write_all(&image)
    }

    fn copy_out(&self) -> Result<(Vec<u8>, usize), SplError> {
        let capacity = self.capacity().ok_or(SplError::NotActive)?;
        let mut image = Vec::new();
        image
            .try_reserve_exact(capacity)
            .map_err(|_| SplError::OutOfMemory)?;
        let cursor = self.copy_into(&mut image)?;
        Ok((image, cursor))
    }

    /// Copy the ring into `image`, which must already have room for it.
    fn copy_into(&self, image: &mut Vec<u8>) -> Result<usize, SplError> {
        match &*self.state.lock() {
            // Re-created larger since the room was reserved; growing here
            // would allocate under the spinlock
            State::Active(ring) if ring.buf.len() > image.capacity() - image.len() => {
                Err(SplError::NotActive)
            }
            State::Active(ring) => {
                image.extend_from_slice(&ring.buf);
                Ok(ring.cursor)
            }
            _ => Err(SplError::NotActive),
        }
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a ring image at `cursor` into (older, newer) halves.
///
/// `cursor` is the offset of the newest end marker. Filler left over from
/// a ring that never wrapped is dropped from the older half.
pub fn ordered_segments(image: &[u8], cursor: usize) -> (&[u8], &[u8]) {
    let cursor = cursor.min(image.len());
    let mut start = (cursor + END_MARKER.len()).min(image.len());
    while start < image.len() && image[start] == CBUF_FILLER {
        start += 1;
    }
    (&image[start..], &image[..cursor])
}

/// Fixed stack buffer for one formatted line
struct LineBuf {
    bytes: [u8; MAX_LINE_LENGTH],
    len: usize,
}

impl LineBuf {
    fn new() -> Self {
        Self {
            bytes: [0; MAX_LINE_LENGTH],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    fn mark_truncated(&mut self) {
        let at = self.len.min(MAX_LINE_LENGTH - TRUNC_MARKER.len());
        self.bytes[at..at + TRUNC_MARKER.len()].copy_from_slice(TRUNC_MARKER);
        self.len = at + TRUNC_MARKER.len();
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MAX_LINE_LENGTH - self.len;
        let take = s.len().min(room);
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn active(capacity: usize) -> DebugLog {
        let log = DebugLog::new();
        log.init(capacity, LineEnding::Empty).unwrap();
        log
    }

    fn raw(log: &DebugLog) -> Vec<u8> {
        let mut out = Vec::new();
        log.save_raw(&mut out).unwrap();
        out
    }

    fn saved(log: &DebugLog) -> Vec<u8> {
        let mut out = Vec::new();
        log.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn fresh_buffer_is_filler() {
        let log = active(32);
        assert_eq!(raw(&log), vec![b'\n'; 32]);
        assert_eq!(log.cursor(), Some(0));
        assert_eq!(log.capacity(), Some(32));
    }

    #[test]
    fn marker_follows_each_entry() {
        let log = active(64);
        log.append(b"one\n").unwrap();
        log.append(b"two\n").unwrap();

        let image = raw(&log);
        assert_eq!(&image[..12], b"one\ntwo\n-EB-");
        assert_eq!(log.cursor(), Some(8));
    }

    #[test]
    fn line_ending_precedes_marker() {
        let log = DebugLog::new();
        log.init(32, LineEnding::CrLf).unwrap();
        log.append(b"abc").unwrap();
        assert_eq!(&raw(&log)[..9], b"abc\r\n-EB-");
        assert_eq!(log.cursor(), Some(5));
    }

    #[test]
    fn sixty_byte_line_in_sixty_four_byte_buffer_wraps() {
        let log = active(64);
        let line = [b'x'; 60];
        assert_eq!(log.append(&line).unwrap(), AppendStatus::Written);

        assert_eq!(log.cursor(), Some(60));
        let image = raw(&log);
        assert_eq!(&image[..60], &line[..]);
        assert_eq!(&image[60..], END_MARKER);
    }

    #[test]
    fn wrap_zero_fills_the_tail_once() {
        let log = active(64);
        log.append(&[b'a'; 10]).unwrap();
        log.append(&[b'b'; 40]).unwrap();
        assert_eq!(log.cursor(), Some(50));

        log.append(&[b'c'; 30]).unwrap();
        let image = raw(&log);
        assert_eq!(log.cursor(), Some(30));
        assert_eq!(&image[..30], &[b'c'; 30][..]);
        assert_eq!(&image[30..34], END_MARKER);
        // Leftover of the overwritten 'b' entry survives up to the old cursor
        assert_eq!(&image[34..50], &[b'b'; 16][..]);
        assert_eq!(&image[50..], &[0u8; 14][..]);
    }

    #[test]
    fn entries_never_straddle_the_end() {
        let log = active(100);
        for i in 0..50u8 {
            let line = [b'A' + (i % 26); 13];
            log.append(&line).unwrap();

            let cursor = log.cursor().unwrap();
            let image = raw(&log);
            assert!(cursor >= 13);
            assert!(cursor + END_MARKER.len() <= 100);
            assert_eq!(&image[cursor - 13..cursor], &line[..]);
            assert_eq!(&image[cursor..cursor + END_MARKER.len()], END_MARKER);
        }
    }

    #[test]
    fn oversized_line_is_truncated_to_capacity() {
        let log = active(16);
        let status = log.append(b"0123456789abcdefghij").unwrap();
        assert_eq!(status, AppendStatus::Truncated);
        assert_eq!(raw(&log), b"0123456789ab-EB-".to_vec());
    }

    #[test]
    fn save_of_unwrapped_log_skips_filler() {
        let log = active(64);
        log.append(b"first\n").unwrap();
        log.append(b"second\n").unwrap();
        assert_eq!(saved(&log), b"first\nsecond\n".to_vec());
    }

    #[test]
    fn save_of_wrapped_log_starts_with_oldest_survivor() {
        let log = active(40);
        log.append(b"aaaaaaaaa\n").unwrap();
        log.append(b"bbbbbbbbb\n").unwrap();
        log.append(b"ccccccccc\n").unwrap();
        // Wraps: cursor 30 + 10 + 4 >= 40
        log.append(b"ddddddddd\n").unwrap();

        let out = saved(&log);
        assert_eq!(out.len(), 36);
        // Oldest survivor is the tail of 'b' that the new marker spared
        assert!(out.starts_with(b"bbbbb\nccccccccc\n"));
        assert!(out[16..26].iter().all(|&b| b == 0));
        assert_eq!(&out[26..], b"ddddddddd\n");
    }

    #[test]
    fn format_prefixes_thread_identity() {
        let log = active(128);
        let status = log
            .format_and_append(0xbeef, format_args!("txg {} synced\n", 42))
            .unwrap();
        assert_eq!(status, AppendStatus::Written);
        assert_eq!(saved(&log), b"0xbeef: txg 42 synced\n".to_vec());
    }

    #[test]
    fn format_overflow_ends_in_trunc_marker() {
        let log = active(4096);
        let long = "z".repeat(2 * MAX_LINE_LENGTH);
        let status = log.format_and_append(1, format_args!("{}", long)).unwrap();
        assert_eq!(status, AppendStatus::Truncated);

        let out = saved(&log);
        assert_eq!(out.len(), MAX_LINE_LENGTH);
        assert!(out.starts_with(b"0x1: zzz"));
        assert!(out.ends_with(TRUNC_MARKER));
    }

    #[test]
    fn inactive_log_is_a_checked_error() {
        let log = DebugLog::new();
        assert_eq!(log.append(b"early"), Err(SplError::NotActive));
        assert_eq!(log.save_to(&mut Vec::new()), Err(SplError::NotActive));
        assert_eq!(log.shutdown(), Err(SplError::NotActive));

        log.init(32, LineEnding::Empty).unwrap();
        assert_eq!(log.init(32, LineEnding::Empty), Err(SplError::AlreadyActive));
        log.shutdown().unwrap();

        assert!(!log.is_active());
        assert_eq!(log.append(b"late"), Err(SplError::NotActive));
        assert_eq!(log.cursor(), None);

        // Reload after unload
        log.init(32, LineEnding::Empty).unwrap();
        assert!(log.is_active());
    }

    #[test]
    fn copy_refuses_a_ring_that_grew_after_reserving() {
        let log = active(64);
        let mut image = Vec::with_capacity(64);
        let reserved = image.capacity();

        log.shutdown().unwrap();
        log.init(4096, LineEnding::Empty).unwrap();
        assert_eq!(log.copy_into(&mut image), Err(SplError::NotActive));
        assert!(image.is_empty());
        assert_eq!(image.capacity(), reserved);

        assert!(log.copy_out().is_ok());
    }

    #[test]
    fn capacity_must_hold_marker() {
        let log = DebugLog::new();
        assert_eq!(log.init(4, LineEnding::Empty), Err(SplError::InvalidArgument));
        assert_eq!(log.init(6, LineEnding::CrLf), Err(SplError::InvalidArgument));
    }

    #[derive(Clone, Default)]
    struct MemFile(Rc<RefCell<Vec<u8>>>);

    impl CbufSink for MemFile {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), SplError> {
            self.0.borrow_mut().extend_from_slice(bytes);
            Ok(())
        }
    }

    struct MemTarget {
        file: MemFile,
        created: RefCell<Vec<String>>,
    }

    impl DumpTarget for MemTarget {
        type Sink = MemFile;

        fn create(&self, path: &str) -> Result<MemFile, SplError> {
            self.created.borrow_mut().push(path.to_string());
            self.file.0.borrow_mut().clear();
            Ok(self.file.clone())
        }
    }

    #[test]
    fn save_to_file_creates_then_writes() {
        let target = MemTarget {
            file: MemFile::default(),
            created: RefCell::new(Vec::new()),
        };
        let log = active(64);
        log.append(b"hello\n").unwrap();
        log.save_to_file(&target, "cbuf.txt").unwrap();

        assert_eq!(*target.created.borrow(), vec!["cbuf.txt".to_string()]);
        assert_eq!(*target.file.0.borrow(), b"hello\n".to_vec());

        log.shutdown().unwrap();
        assert_eq!(log.save_to_file(&target, "again.txt"), Err(SplError::NotActive));
        assert_eq!(target.created.borrow().len(), 1);
    }

    #[test]
    fn save_to_real_file() {
        let path = std::env::temp_dir().join(format!("spl-cbuf-{}.txt", std::process::id()));
        let path = path.to_str().unwrap();
        let log = active(64);
        log.append(b"on disk\n").unwrap();
        log.save_to_file(&FileTarget, path).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"on disk\n".to_vec());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn concurrent_appends_keep_one_marker() {
        use std::sync::Arc;
        use std::thread;

        let log = Arc::new(active(4096));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..200 {
                        log.format_and_append(t, format_args!("entry {}\n", i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let image = raw(&log);
        let markers = image
            .windows(END_MARKER.len())
            .filter(|w| *w == END_MARKER)
            .count();
        assert_eq!(markers, 1);
    }
}
