//! Request objects submitted to a connection
//!
//! A request is immutable once submitted. The connection never injects
//! headers: `Host`, `Content-Length` and `Transfer-Encoding` are the
//! caller's responsibility, and headers go to the wire exactly as
//! added, in order, duplicates preserved. The framing-critical ones
//! are only *scanned* to decide how the body is encoded.

use std::io;

use headers;
use client::Error;

/// How the request body is framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `Content-Length` is declared, body is streamed and checked
    Fixed(u64),
    /// `Transfer-Encoding: chunked`, body comes from the chunk queue
    Chunked,
    /// Neither is declared, the head is the whole request
    Empty,
}

/// Capability interface for request body data
///
/// Implementations stream bytes into encoder-supplied buffers. `read`
/// returning `0` while `eof()` is still false means no data is
/// available right now; the encoder suspends and retries on the next
/// tick. Length and rewind are optional capabilities.
pub trait BodySource: Send {
    /// Copy up to `buf.len()` bytes into `buf`, return the number copied
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// True once the source is exhausted
    fn eof(&self) -> bool;
    /// Total length, when known up front
    fn len(&self) -> Option<u64> {
        None
    }
    /// Reset to the beginning, for sources that support it
    fn rewind(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "body source can't rewind"))
    }
}

/// An in-memory body source
#[derive(Debug)]
pub struct BufferBody {
    data: Vec<u8>,
    off: usize,
}

impl BufferBody {
    pub fn new<T: Into<Vec<u8>>>(data: T) -> BufferBody {
        BufferBody {
            data: data.into(),
            off: 0,
        }
    }
}

impl BodySource for BufferBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let num = ::std::cmp::min(buf.len(), self.data.len() - self.off);
        buf[..num].copy_from_slice(&self.data[self.off..self.off + num]);
        self.off += num;
        Ok(num)
    }
    fn eof(&self) -> bool {
        self.off == self.data.len()
    }
    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
    fn rewind(&mut self) -> io::Result<()> {
        self.off = 0;
        Ok(())
    }
}

/// A request to be submitted with `make_request`
pub struct Request {
    method: String,
    target: String,
    headers: Vec<(String, Vec<u8>)>,
    body: Option<Box<BodySource>>,
}

impl Request {
    /// Start building a request
    ///
    /// Method and target are written to the request line verbatim;
    /// supplying tokens that break the line (spaces in the method,
    /// control characters anywhere) is the caller's bug, just like
    /// calling the low-level serializer in the wrong state.
    pub fn new(method: &str, target: &str) -> Request {
        Request {
            method: method.to_string(),
            target: target.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Append a header
    ///
    /// Order is preserved and duplicates are allowed. Names and values
    /// containing CR or LF are rejected: they would desynchronize the
    /// wire framing.
    pub fn add_header<V: AsRef<[u8]>>(&mut self, name: &str, value: V)
        -> Result<&mut Request, Error>
    {
        fn bad(value: &[u8]) -> bool {
            value.iter().any(|&ch| ch == b'\r' || ch == b'\n')
        }
        if bad(name.as_bytes()) || bad(value.as_ref()) {
            return Err(Error::InvalidHeader);
        }
        self.headers.push((name.to_string(), value.as_ref().to_vec()));
        Ok(self)
    }

    /// Attach a body source for a `Content-Length` request
    ///
    /// Chunked requests don't carry a source here; their data arrives
    /// through the stream's chunk queue.
    pub fn body(&mut self, source: Box<BodySource>) -> &mut Request {
        self.body = Some(source);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }
    pub fn target(&self) -> &str {
        &self.target
    }
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }
    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }

    /// True if the request itself asks for connection teardown
    pub fn is_close(&self) -> bool {
        self.headers.iter()
            .filter(|&&(ref name, _)| name.eq_ignore_ascii_case("Connection"))
            .any(|&(_, ref value)| headers::connection_close(value))
    }

    /// Decide body framing from the declared headers
    ///
    /// Mirrors the response-side rules: a last transfer coding of
    /// `chunked` wins, then `Content-Length`, else no body.
    pub fn body_kind(&self) -> Result<BodyKind, Error> {
        let mut result = BodyKind::Empty;
        let mut has_length = false;
        for &(ref name, ref value) in &self.headers {
            if name.eq_ignore_ascii_case("Transfer-Encoding") {
                if headers::last_token_chunked(value) {
                    result = BodyKind::Chunked;
                }
            } else if name.eq_ignore_ascii_case("Content-Length") {
                if has_length {
                    return Err(Error::DuplicateContentLength);
                }
                has_length = true;
                if result != BodyKind::Chunked {
                    let s = ::std::str::from_utf8(value)
                        .map_err(|_| Error::BadContentLength)?;
                    let len = s.trim().parse()
                        .map_err(|_| Error::BadContentLength)?;
                    result = BodyKind::Fixed(len);
                }
            }
        }
        Ok(result)
    }

    pub fn take_body(&mut self) -> Option<Box<BodySource>> {
        self.body.take()
    }
}
