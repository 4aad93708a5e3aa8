//! Request serialisation into bounded outbound buffers
//!
//! The head is rendered once into a staging buffer and drained into
//! whatever buffers the pipeline leases out, so any field can split
//! across buffer boundaries. Body bytes are streamed straight from
//! the source. The encoder never blocks waiting for a larger buffer
//! than the pipeline offers.

use std::io::Write;
use std::mem;

use netbuf::Buf;

use channel::OutBuf;
use chunk::{Chunk, ChunkQueue};
use enums::Version;
use request::{Request, BodyKind, BodySource};
use client::Error;


/// What `fill` accomplished on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The request is fully serialised
    Done,
    /// The outbound buffer is full, more data is waiting
    BufferFull,
    /// Nothing to write until a chunk (or body data) shows up
    Parked,
}

enum NextBody {
    Fixed(u64, Box<BodySource>),
    Chunked,
    Empty,
}

enum Phase {
    /// Draining the staged head
    Head(NextBody),
    FixedBody { remaining: u64, source: Box<BodySource> },
    /// Chunk queue is empty and not yet terminated
    AwaitChunk,
    /// Draining the staged size line
    ChunkLine(Chunk),
    ChunkData { chunk: Chunk, remaining: u64 },
    /// Draining the CRLF that closes the chunk payload
    ChunkCrlf(Chunk),
    /// Draining the staged terminator (`0[;ext]\r\n\r\n`)
    Terminating(Chunk),
    Done,
    Void,
}

pub struct Encoder {
    staged: Buf,
    phase: Phase,
}

impl Encoder {
    /// Render the head of `req` and set up body serialisation
    ///
    /// The head is the request line plus the headers exactly as the
    /// caller added them; nothing is injected.
    pub fn new(req: &mut Request) -> Result<Encoder, Error> {
        let kind = req.body_kind()?;
        let mut staged = Buf::new();
        write!(staged, "{} {} {}\r\n",
            req.method(), req.target(), Version::Http11).unwrap();
        for &(ref name, ref value) in req.headers() {
            staged.write_all(name.as_bytes()).unwrap();
            staged.write_all(b": ").unwrap();
            staged.write_all(value).unwrap();
            staged.write_all(b"\r\n").unwrap();
        }
        staged.write_all(b"\r\n").unwrap();
        let next = match (kind, req.take_body()) {
            (BodyKind::Fixed(num), Some(source)) => {
                NextBody::Fixed(num, source)
            }
            (BodyKind::Fixed(0), None) => NextBody::Empty,
            (BodyKind::Fixed(num), None) => {
                // a declared length with nothing behind it surfaces as
                // a too-short body on the first fill
                NextBody::Fixed(num,
                    Box::new(::request::BufferBody::new(Vec::new()))
                        as Box<BodySource>)
            }
            (BodyKind::Chunked, _) => NextBody::Chunked,
            (BodyKind::Empty, _) => NextBody::Empty,
        };
        Ok(Encoder {
            staged: staged,
            phase: Phase::Head(next),
        })
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Move as many bytes as possible into `out`
    ///
    /// Chunked requests pull from `chunks`; enqueueing is what wakes a
    /// parked encoder.
    pub fn fill(&mut self, out: &mut OutBuf, chunks: &mut ChunkQueue)
        -> Result<Progress, Error>
    {
        loop {
            if out.is_full() {
                return Ok(Progress::BufferFull);
            }
            match mem::replace(&mut self.phase, Phase::Void) {
                Phase::Head(next) => {
                    self.drain_staged(out);
                    if self.staged.len() > 0 {
                        self.phase = Phase::Head(next);
                        continue;
                    }
                    self.phase = match next {
                        NextBody::Fixed(remaining, source) => {
                            Phase::FixedBody {
                                remaining: remaining,
                                source: source,
                            }
                        }
                        NextBody::Chunked => Phase::AwaitChunk,
                        NextBody::Empty => Phase::Done,
                    };
                }
                Phase::FixedBody { remaining, mut source } => {
                    if remaining == 0 {
                        if !source.eof() {
                            // more data than Content-Length declared,
                            // nothing past the limit reaches the wire
                            return Err(Error::OutgoingLengthIncorrect);
                        }
                        self.phase = Phase::Done;
                        continue;
                    }
                    let num = pump_source(out, &mut source, remaining)?;
                    if num == 0 {
                        if source.eof() {
                            return Err(Error::OutgoingLengthIncorrect);
                        }
                        self.phase = Phase::FixedBody {
                            remaining: remaining,
                            source: source,
                        };
                        return Ok(Progress::Parked);
                    }
                    self.phase = Phase::FixedBody {
                        remaining: remaining - num as u64,
                        source: source,
                    };
                }
                Phase::AwaitChunk => {
                    let chunk = match chunks.pop() {
                        Some(chunk) => chunk,
                        None => {
                            self.phase = Phase::AwaitChunk;
                            return Ok(Progress::Parked);
                        }
                    };
                    write!(self.staged, "{:x}", chunk.size()).unwrap();
                    for &(ref key, ref value) in chunk.extensions() {
                        self.staged.write_all(b";").unwrap();
                        self.staged.write_all(key).unwrap();
                        self.staged.write_all(b"=").unwrap();
                        self.staged.write_all(value).unwrap();
                    }
                    self.staged.write_all(b"\r\n").unwrap();
                    if chunk.is_terminator() {
                        self.staged.write_all(b"\r\n").unwrap();
                        self.phase = Phase::Terminating(chunk);
                    } else {
                        self.phase = Phase::ChunkLine(chunk);
                    }
                }
                Phase::ChunkLine(chunk) => {
                    self.drain_staged(out);
                    if self.staged.len() == 0 {
                        let remaining = chunk.size();
                        self.phase = Phase::ChunkData {
                            chunk: chunk,
                            remaining: remaining,
                        };
                    } else {
                        self.phase = Phase::ChunkLine(chunk);
                    }
                }
                Phase::ChunkData { mut chunk, remaining } => {
                    if remaining == 0 {
                        let long = chunk.source_mut()
                            .map(|src| !src.eof()).unwrap_or(false);
                        if long {
                            let err = Error::OutgoingLengthIncorrect;
                            chunk.complete(Err(err.clone()));
                            return Err(err);
                        }
                        self.staged.write_all(b"\r\n").unwrap();
                        self.phase = Phase::ChunkCrlf(chunk);
                        continue;
                    }
                    let result = {
                        let source = chunk.source_mut()
                            .expect("data chunk has a source");
                        pump_source(out, source, remaining)
                    };
                    let num = match result {
                        Ok(num) => num,
                        Err(err) => {
                            chunk.complete(Err(err.clone()));
                            return Err(err);
                        }
                    };
                    if num == 0 {
                        let short = chunk.source_mut()
                            .map(|src| src.eof()).unwrap_or(true);
                        if short {
                            let err = Error::OutgoingLengthIncorrect;
                            chunk.complete(Err(err.clone()));
                            return Err(err);
                        }
                        self.phase = Phase::ChunkData {
                            chunk: chunk,
                            remaining: remaining,
                        };
                        return Ok(Progress::Parked);
                    }
                    self.phase = Phase::ChunkData {
                        chunk: chunk,
                        remaining: remaining - num as u64,
                    };
                }
                Phase::ChunkCrlf(mut chunk) => {
                    self.drain_staged(out);
                    if self.staged.len() == 0 {
                        chunk.complete(Ok(()));
                        self.phase = Phase::AwaitChunk;
                    } else {
                        self.phase = Phase::ChunkCrlf(chunk);
                    }
                }
                Phase::Terminating(mut chunk) => {
                    self.drain_staged(out);
                    if self.staged.len() == 0 {
                        chunk.complete(Ok(()));
                        self.phase = Phase::Done;
                    } else {
                        self.phase = Phase::Terminating(chunk);
                    }
                }
                Phase::Done => {
                    self.phase = Phase::Done;
                    return Ok(Progress::Done);
                }
                Phase::Void => unreachable!(),
            }
        }
    }

    fn drain_staged(&mut self, out: &mut OutBuf) {
        let num = out.write(&self.staged[..]);
        self.staged.consume(num);
    }
}

/// Read from the source straight into the outbound buffer
///
/// Returns the number of bytes moved; `0` with the source not at EOF
/// means no data is available right now. Source failures surface as
/// `CallbackError`: the source is user code.
fn pump_source(out: &mut OutBuf, source: &mut Box<BodySource>,
    remaining: u64)
    -> Result<usize, Error>
{
    let mut scratch = [0u8; 4096];
    let want = ::std::cmp::min(
        ::std::cmp::min(remaining, scratch.len() as u64) as usize,
        out.remaining());
    if want == 0 {
        return Ok(0);
    }
    let num = source.read(&mut scratch[..want])
        .map_err(|_| Error::CallbackError)?;
    assert!(num <= want, "body source overran the read buffer");
    let written = out.write(&scratch[..num]);
    debug_assert_eq!(written, num);
    Ok(num)
}
