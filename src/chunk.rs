//! Outbound chunks for `Transfer-Encoding: chunked` request bodies
//!
//! Chunks are produced by the user (from any thread) and consumed by
//! the encoder on the I/O thread. Each chunk owns its data source and
//! an optional completion callback; the callback fires on the I/O
//! thread exactly once, either after the chunk's bytes are written or
//! when the stream is cancelled, so the user can release the
//! underlying buffer in both cases.

use std::collections::VecDeque;
use std::fmt;

use request::BodySource;
use client::Error;

/// One unit of a chunked request body
///
/// A chunk with declared size zero is the terminator: it closes the
/// body. Extensions are emitted on the terminator too.
pub struct Chunk {
    size: u64,
    extensions: Vec<(Vec<u8>, Vec<u8>)>,
    source: Option<Box<BodySource>>,
    on_complete: Option<Box<FnMut(Result<(), Error>) + Send>>,
}

impl Chunk {
    /// A data chunk with a declared size
    ///
    /// The source must yield exactly `size` bytes; any mismatch is a
    /// fatal framing error on the stream.
    pub fn new(source: Box<BodySource>, size: u64) -> Chunk {
        Chunk {
            size: size,
            extensions: Vec::new(),
            source: Some(source),
            on_complete: None,
        }
    }

    /// The zero-sized chunk that terminates the body
    pub fn terminator() -> Chunk {
        Chunk {
            size: 0,
            extensions: Vec::new(),
            source: None,
            on_complete: None,
        }
    }

    /// Append a `;key=value` extension to the chunk's size line
    ///
    /// Bytes are emitted raw, without quoting. CR and LF are rejected
    /// since they would break the size line.
    pub fn add_extension<K, V>(&mut self, key: K, value: V)
        -> Result<&mut Chunk, Error>
        where K: AsRef<[u8]>, V: AsRef<[u8]>
    {
        fn bad(value: &[u8]) -> bool {
            value.iter().any(|&ch| ch == b'\r' || ch == b'\n')
        }
        if bad(key.as_ref()) || bad(value.as_ref()) {
            return Err(Error::InvalidHeader);
        }
        self.extensions.push(
            (key.as_ref().to_vec(), value.as_ref().to_vec()));
        Ok(self)
    }

    /// Attach a completion callback
    pub fn on_complete<F>(&mut self, fun: F) -> &mut Chunk
        where F: FnMut(Result<(), Error>) + Send + 'static
    {
        self.on_complete = Some(Box::new(fun));
        self
    }

    pub fn is_terminator(&self) -> bool {
        self.size == 0
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn extensions(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.extensions
    }
    pub fn source_mut(&mut self) -> Option<&mut Box<BodySource>> {
        self.source.as_mut()
    }

    /// Fire the completion callback (idempotent)
    pub fn complete(&mut self, result: Result<(), Error>) {
        if let Some(mut fun) = self.on_complete.take() {
            fun(result);
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // a chunk that never reached the wire still reports its fate
        self.complete(Err(Error::Cancelled));
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("size", &self.size)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Per-stream FIFO of chunks awaiting the encoder
#[derive(Debug)]
pub struct ChunkQueue {
    queue: VecDeque<Chunk>,
    terminated: bool,
}

impl ChunkQueue {
    pub fn new() -> ChunkQueue {
        ChunkQueue {
            queue: VecDeque::new(),
            terminated: false,
        }
    }

    /// Enqueue a chunk
    ///
    /// # Panics
    ///
    /// When a chunk is enqueued after the terminator. The body is
    /// closed at that point and the encoder will never look again.
    pub fn push(&mut self, chunk: Chunk) {
        if self.terminated {
            panic!("chunk enqueued after the terminating chunk");
        }
        if chunk.is_terminator() {
            self.terminated = true;
        }
        self.queue.push_back(chunk);
    }

    pub fn pop(&mut self) -> Option<Chunk> {
        self.queue.pop_front()
    }

    /// True once the terminator has been enqueued
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drain the queue, firing every completion callback with `err`
    pub fn cancel(&mut self, err: &Error) {
        while let Some(mut chunk) = self.queue.pop_front() {
            chunk.complete(Err(err.clone()));
        }
    }
}
