//! Sequential, sometimes-seekable byte stream abstraction over a file or a
//! socket, plus transparent detection and decompression of whole
//! gzip/zlib-compressed trace files.
//!
//! Grounded on the original tool's `FileLike`: a small "fifo reads and
//! writes, occasionally with positioning" interface, not a general
//! `std::io::Seek` implementation — sockets never support positioning.

mod compressed;

pub use compressed::{is_compressed, decompress_file};

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;

use gapitrace_format::{TraceError, TraceErrorKind};

/// How many times a short write is retried before giving up.
const WRITE_RETRY_LIMIT: u32 = 8;

enum Backing {
    File(File),
    Socket(TcpStream),
}

/// A file-like stream: either a seekable file or a message-stream socket.
pub struct FileLikeStream {
    backing: Backing,
}

impl FileLikeStream {
    #[must_use]
    pub fn from_file(file: File) -> Self {
        Self {
            backing: Backing::File(file),
        }
    }

    #[must_use]
    pub fn from_socket(socket: TcpStream) -> Self {
        Self {
            backing: Backing::Socket(socket),
        }
    }

    #[must_use]
    pub fn is_socket(&self) -> bool {
        matches!(self.backing, Backing::Socket(_))
    }

    /// Reads a little-endian `u64` length prefix, then exactly that many
    /// bytes.
    pub fn read_sized(&mut self) -> Result<Vec<u8>, TraceError> {
        let len = self.read_u64_raw()?;
        let mut buf = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX)];
        self.read_raw_into(&mut buf)?;
        Ok(buf)
    }

    /// Reads exactly `buf.len()` bytes with no length prefix.
    pub fn read_raw_into(&mut self, buf: &mut [u8]) -> Result<(), TraceError> {
        self.reader()
            .read_exact(buf)
            .map_err(|source| stream_io_err("gapitrace_stream::read_raw", source))
    }

    /// Reads exactly `buf.len()` bytes, distinguishing a clean end-of-stream
    /// (no bytes available at all, returns `false`) from a truncated read
    /// partway through a record (returns `StreamIO`). Used by readers that
    /// walk a sequence of fixed-size records with no outer length prefix,
    /// where running out of records is expected but running out mid-record
    /// means the file is corrupt.
    pub fn try_read_raw(&mut self, buf: &mut [u8]) -> Result<bool, TraceError> {
        if buf.is_empty() {
            return Ok(true);
        }

        let first = self
            .reader()
            .read(&mut buf[..1])
            .map_err(|source| stream_io_err("gapitrace_stream::try_read_raw", source))?;
        if first == 0 {
            return Ok(false);
        }

        self.reader()
            .read_exact(&mut buf[1..])
            .map_err(|source| stream_io_err("gapitrace_stream::try_read_raw", source))?;
        Ok(true)
    }

    /// Writes a little-endian `u64` length prefix, then `bytes`.
    pub fn write_sized(&mut self, bytes: &[u8]) -> Result<(), TraceError> {
        self.write_u64_raw(bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    /// Writes `bytes` with no length prefix, retrying short writes until
    /// exhaustion.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TraceError> {
        let mut remaining = bytes;
        let mut attempts = 0;
        while !remaining.is_empty() {
            if attempts >= WRITE_RETRY_LIMIT {
                return Err(TraceError::new(
                    "gapitrace_stream::write_raw",
                    TraceErrorKind::StreamIO,
                ));
            }
            let written = self
                .writer()
                .write(remaining)
                .map_err(|source| stream_io_err("gapitrace_stream::write_raw", source))?;
            if written == 0 {
                attempts += 1;
                continue;
            }
            remaining = &remaining[written..];
        }
        Ok(())
    }

    /// Current byte position. Unsupported on sockets.
    pub fn position(&mut self) -> Result<u64, TraceError> {
        match &mut self.backing {
            Backing::File(file) => file
                .stream_position()
                .map_err(|source| stream_io_err("gapitrace_stream::position", source)),
            Backing::Socket(_) => Err(TraceError::new(
                "gapitrace_stream::position",
                TraceErrorKind::UnsupportedOnSocket,
            )),
        }
    }

    /// Flushes any buffered writes to the underlying file or socket.
    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.writer()
            .flush()
            .map_err(|source| stream_io_err("gapitrace_stream::flush", source))
    }

    /// Seeks to an absolute byte offset. Unsupported on sockets.
    pub fn set_position(&mut self, offset: u64) -> Result<(), TraceError> {
        match &mut self.backing {
            Backing::File(file) => file
                .seek(SeekFrom::Start(offset))
                .map(|_| ())
                .map_err(|source| stream_io_err("gapitrace_stream::set_position", source)),
            Backing::Socket(_) => Err(TraceError::new(
                "gapitrace_stream::set_position",
                TraceErrorKind::UnsupportedOnSocket,
            )),
        }
    }

    fn read_u64_raw(&mut self) -> Result<u64, TraceError> {
        let mut buf = [0u8; 8];
        self.read_raw_into(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u64_raw(&mut self, value: u64) -> Result<(), TraceError> {
        self.write_raw(&value.to_le_bytes())
    }

    fn reader(&mut self) -> &mut dyn Read {
        match &mut self.backing {
            Backing::File(file) => file,
            Backing::Socket(socket) => socket,
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match &mut self.backing {
            Backing::File(file) => file,
            Backing::Socket(socket) => socket,
        }
    }
}

fn stream_io_err(context: &'static str, source: io::Error) -> TraceError {
    TraceError::new(context, TraceErrorKind::StreamIO).with_source(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    fn tempfile() -> File {
        tempfile_inner().expect("failed to create backing tempfile for test")
    }

    fn tempfile_inner() -> io::Result<File> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "gapitrace-stream-test-{}-{unique}",
            std::process::id()
        ));
        let file = File::options().create(true).truncate(true).read(true).write(true).open(&path)?;
        Ok(file)
    }

    #[test]
    fn sized_round_trip() {
        let mut stream = FileLikeStream::from_file(tempfile());
        stream.write_sized(b"hello world").unwrap();
        stream.set_position(0).unwrap();
        let read_back = stream.read_sized().unwrap();
        assert_eq!(read_back, b"hello world");
    }

    #[test]
    fn raw_round_trip() {
        let mut stream = FileLikeStream::from_file(tempfile());
        stream.write_raw(&[1, 2, 3, 4]).unwrap();
        stream.set_position(0).unwrap();
        let mut buf = [0u8; 4];
        stream.read_raw_into(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn try_read_raw_reports_clean_eof_and_truncation() {
        let mut stream = FileLikeStream::from_file(tempfile());
        stream.write_raw(&[1, 2, 3]).unwrap();
        stream.set_position(0).unwrap();

        let mut buf = [0u8; 3];
        assert!(stream.try_read_raw(&mut buf).unwrap());
        assert_eq!(buf, [1, 2, 3]);

        let mut buf = [0u8; 3];
        assert!(!stream.try_read_raw(&mut buf).unwrap());

        let mut stream = FileLikeStream::from_file(tempfile());
        stream.write_raw(&[1, 2]).unwrap();
        stream.set_position(0).unwrap();
        let mut buf = [0u8; 3];
        assert!(stream.try_read_raw(&mut buf).is_err());
    }

    #[test]
    fn position_tracks_writes() {
        let mut stream = FileLikeStream::from_file(tempfile());
        stream.write_raw(&[0u8; 16]).unwrap();
        assert_eq!(stream.position().unwrap(), 16);
    }
}
