//! Incremental framing of incoming chunked bodies
//!
//! Framing bytes (size lines, per-chunk CRLFs, trailers) are removed
//! from the buffer in place, so the front of the buffer always holds
//! nothing but contiguous payload. `buffered` counts payload bytes
//! ready for delivery, `pending` payload bytes of the current chunk
//! still on the wire.
//!
//! Removal is budgeted: every framing byte is charged against the
//! read window, and a framing element is only removed when the budget
//! covers it whole, so the window can never go negative.

use netbuf::Buf;
use httparse;

use client::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Expecting a `size [;ext] CRLF` line
    Size,
    /// Payload bytes of the current chunk are arriving
    Data,
    /// Expecting the CRLF that closes a chunk's payload
    DataCrlf,
    /// Zero chunk seen, consuming trailer lines until the empty one
    Trailer,
    Done,
}

#[derive(Debug, Clone)]
pub struct State {
    buffered: usize,
    pending: u64,
    stage: Stage,
    /// Raw extension bytes per size line, oldest first
    exts: Vec<Vec<u8>>,
}

/// Locate a CRLF-terminated line in `buf`
///
/// `Ok(Some(n))` is the line length excluding the CRLF, `Ok(None)`
/// means the line is still incomplete. A bare LF, or a CR followed by
/// anything but LF, is malformed.
fn find_line(buf: &[u8]) -> Result<Option<usize>, ()> {
    for (idx, &ch) in buf.iter().enumerate() {
        if ch == b'\n' {
            return Err(());
        }
        if ch == b'\r' {
            if idx + 1 >= buf.len() {
                return Ok(None);
            }
            if buf[idx + 1] == b'\n' {
                return Ok(Some(idx));
            }
            return Err(());
        }
    }
    Ok(None)
}

/// Split a size line into the chunk size and the raw extension bytes
fn parse_size_line(line: &[u8]) -> Result<(u64, &[u8]), Error> {
    let mut size: u64 = 0;
    let mut digits = 0;
    let mut idx = 0;
    while idx < line.len() {
        let value = match line[idx] {
            ch @ b'0'...b'9' => (ch - b'0') as u64,
            ch @ b'a'...b'f' => (ch - b'a' + 10) as u64,
            ch @ b'A'...b'F' => (ch - b'A' + 10) as u64,
            _ => break,
        };
        size = size.checked_mul(16)
            .and_then(|s| s.checked_add(value))
            .ok_or(Error::BadChunkSize)?;
        digits += 1;
        idx += 1;
    }
    if digits == 0 {
        return Err(Error::BadChunkSize);
    }
    if idx < line.len() && line[idx] != b';' {
        return Err(Error::BadChunkSize);
    }
    Ok((size, &line[idx..]))
}

impl State {
    pub fn new() -> State {
        State {
            buffered: 0,
            pending: 0,
            stage: Stage::Size,
            exts: Vec::new(),
        }
    }

    /// Advance framing over the bytes past the payload prefix
    ///
    /// Removes up to `budget` framing bytes from `buf` and returns the
    /// number removed. Stops when input runs out, the budget would be
    /// overrun, or the body is done.
    pub fn parse(&mut self, buf: &mut Buf, budget: usize)
        -> Result<usize, Error>
    {
        let mut removed = 0;
        loop {
            let off = self.buffered;
            match self.stage {
                Stage::Size => {
                    let line = match find_line(&buf[off..]) {
                        Ok(Some(x)) => x,
                        Ok(None) => return Ok(removed),
                        Err(()) => return Err(Error::BadChunkSize),
                    };
                    if removed + line + 2 > budget {
                        return Ok(removed);
                    }
                    let (size, ext) = {
                        let (size, ext) = parse_size_line(
                            &buf[off..off + line])?;
                        (size, ext.to_vec())
                    };
                    if !ext.is_empty() {
                        self.exts.push(ext);
                    }
                    buf.remove_range(off..off + line + 2);
                    removed += line + 2;
                    if size == 0 {
                        self.stage = Stage::Trailer;
                    } else {
                        self.pending = size;
                        self.stage = Stage::Data;
                    }
                }
                Stage::Data => {
                    let avail = (buf.len() - off) as u64;
                    let taken = ::std::cmp::min(avail, self.pending);
                    self.buffered += taken as usize;
                    self.pending -= taken;
                    if self.pending > 0 {
                        return Ok(removed);
                    }
                    self.stage = Stage::DataCrlf;
                }
                Stage::DataCrlf => {
                    if buf.len() - off < 2 {
                        return Ok(removed);
                    }
                    if &buf[off..off + 2] != b"\r\n" {
                        return Err(Error::BadChunkSize);
                    }
                    if removed + 2 > budget {
                        return Ok(removed);
                    }
                    buf.remove_range(off..off + 2);
                    removed += 2;
                    self.stage = Stage::Size;
                }
                Stage::Trailer => {
                    let line = match find_line(&buf[off..]) {
                        Ok(Some(x)) => x,
                        Ok(None) => return Ok(removed),
                        Err(()) => {
                            return Err(Error::Header(
                                httparse::Error::NewLine));
                        }
                    };
                    if removed + line + 2 > budget {
                        return Ok(removed);
                    }
                    if line > 0 &&
                        !buf[off..off + line].contains(&b':')
                    {
                        return Err(Error::Header(
                            httparse::Error::HeaderName));
                    }
                    buf.remove_range(off..off + line + 2);
                    removed += line + 2;
                    if line == 0 {
                        self.stage = Stage::Done;
                    }
                }
                Stage::Done => return Ok(removed),
            }
        }
    }

    /// Payload bytes sitting at the front of the buffer
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Raw extension bytes (`;key=value...`), one entry per size line
    /// that carried any, since the last take
    pub fn take_extensions(&mut self) -> Vec<Vec<u8>> {
        ::std::mem::replace(&mut self.exts, Vec::new())
    }

    /// Account for payload bytes the caller removed from the front
    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }
}
