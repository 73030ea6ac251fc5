//! Buffered JSONL reader pool (component B, §4.B).
//!
//! A process-wide pool of reusable 1 MiB byte buffers backs every scanner.
//! `IncrementalReader` opens a file, seeks to a caller-supplied offset, and
//! yields newline-delimited records while tracking a precise resume offset.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;

/// Default buffer capacity handed out by the pool (§6: "scanner buffer 1 MiB").
pub const BUFFER_SIZE: usize = 1024 * 1024;

/// A single record may not exceed this many bytes (§6: "scanner max token 10 MiB").
pub const MAX_TOKEN_LEN: usize = 10 * 1024 * 1024;

/// Process-wide pool of reusable line-accumulation buffers.
///
/// Unbounded in buffer count, bounded in per-buffer size only by whatever a
/// caller grows it to for one oversized line; it is shrunk back to
/// `BUFFER_SIZE` on release so one large record does not permanently bloat
/// the pool.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new() -> Self {
        BufferPool {
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn global() -> &'static BufferPool {
        static POOL: OnceLock<BufferPool> = OnceLock::new();
        POOL.get_or_init(BufferPool::new)
    }

    /// Borrow a buffer. Guaranteed to be returned on every exit path via
    /// `PooledBuffer`'s `Drop` impl — leakage is a programming error, not a
    /// design concern (§5).
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_SIZE));
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        if buf.capacity() > BUFFER_SIZE {
            buf.shrink_to(BUFFER_SIZE);
        }
        self.buffers.lock().push(buf);
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

/// Opens `path`, seeks to `offset`, and yields newline-delimited records one
/// at a time, advancing a running offset as `initialOffset + Σ(len(line) + 1)`.
///
/// The terminal condition is end-of-file, reported as `Ok(None)` — distinct
/// from the `Err` returned on any I/O failure, which per §4.B sends the
/// caller back to a full re-parse rather than trying to resume.
pub struct IncrementalReader {
    reader: BufReader<File>,
    offset: u64,
}

impl IncrementalReader {
    pub fn open_at(path: &Path, offset: u64) -> io::Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(IncrementalReader {
            reader: BufReader::with_capacity(BUFFER_SIZE, file),
            offset,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next `\n`-terminated record using a pooled buffer, stripping
    /// the trailing `\n` (and a tolerated `\r` before it). `\r` is tolerated
    /// anywhere the bit-level contract allows it (§6).
    pub fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let pool = BufferPool::global();
        let mut buf = pool.acquire();
        buf.clear();

        let n = read_until_capped(&mut self.reader, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.offset += n as u64;

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(buf.to_vec()))
    }
}

/// `BufRead::read_until` with an upper bound on how far a single record may
/// grow — a pathological file cannot force a scanner buffer past
/// `MAX_TOKEN_LEN`, it is simply truncated there and the caller's JSON
/// decode fails (and the record is skipped per §4.C.5).
fn read_until_capped(reader: &mut BufReader<File>, buf: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0usize;
    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                if buf.len() + i + 1 <= MAX_TOKEN_LEN {
                    buf.extend_from_slice(&available[..=i]);
                }
                let used = i + 1;
                reader.consume(used);
                total += used;
                break;
            }
            None => {
                let len = available.len();
                if buf.len() + len <= MAX_TOKEN_LEN {
                    buf.extend_from_slice(available);
                }
                reader.consume(len);
                total += len;
            }
        }
    }
    Ok(total)
}

/// One buffer acquire/release cycle with no leftover state, used by callers
/// that just need to read a whole small file (e.g. the P-format header line)
/// without standing up an `IncrementalReader`.
pub fn read_first_line(path: &Path) -> io::Result<Option<String>> {
    let mut reader = IncrementalReader::open_at(path, 0)?;
    match reader.next_record()? {
        Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_records_and_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"{\"a\":1}\n{\"a\":2}\n").unwrap();

        let mut reader = IncrementalReader::open_at(&path, 0).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first, b"{\"a\":1}");
        assert_eq!(reader.offset(), 8);

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second, b"{\"a\":2}");
        assert_eq!(reader.offset(), 16);

        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn resumes_from_a_caller_supplied_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"{\"a\":1}\n{\"a\":2}\n").unwrap();

        let mut reader = IncrementalReader::open_at(&path, 8).unwrap();
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec, b"{\"a\":2}");
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"{\"a\":1}\r\n").unwrap();

        let mut reader = IncrementalReader::open_at(&path, 0).unwrap();
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec, b"{\"a\":1}");
    }

    #[test]
    fn no_trailing_newline_still_yields_final_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"{\"a\":1}").unwrap();

        let mut reader = IncrementalReader::open_at(&path, 0).unwrap();
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec, b"{\"a\":1}");
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn buffer_pool_reuses_released_buffers() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"hello");
        }
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= BUFFER_SIZE);
    }

    #[test]
    fn read_first_line_reads_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{{\"type\":\"session\"}}").unwrap();
        writeln!(file, "{{\"type\":\"message\"}}").unwrap();

        let line = read_first_line(&path).unwrap().unwrap();
        assert_eq!(line, "{\"type\":\"session\"}");
    }
}
