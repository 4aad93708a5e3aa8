//! Per-request stream state
//!
//! A stream is one request/response exchange. It is owned jointly by
//! the user (through `StreamRef`) and the connection; it is destroyed
//! when both sides have let go. All mutable state lives behind a
//! mutex that is only ever contended for the short marshalling ops.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chunk::ChunkQueue;
use request::Request;
use client::Error;
use client::encoder::Encoder;
use client::parser::Head;


/// How the response body should be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Accumulate the whole body and deliver it in one final call
    ///
    /// The argument is the maximum size; a longer body fails the
    /// stream with `BodyTooLong`.
    Buffered(usize),
    /// Deliver body bytes as they arrive
    Progressive,
}

/// Per-stream callbacks, driven on the I/O thread
///
/// For one stream the calls come strictly in this order:
/// `info_received*`, `headers_received`, `data_received*` (the last
/// one has `end == true`), `completed` (exactly once). Once any
/// callback returns an error nothing else is called except
/// `completed`. Across streams, all callbacks of an earlier stream
/// finish before any callback of a later one starts.
pub trait Codec: Send {
    /// Final response headers received
    ///
    /// Returns how the body should be delivered.
    fn headers_received(&mut self, head: &Head) -> Result<RecvMode, Error>;

    /// An informational (1xx, except 101) header block received
    fn info_received(&mut self, _head: &Head) -> Result<(), Error> {
        Ok(())
    }

    /// Raw chunk-extension bytes (`;key=value...`) from the body
    fn extensions_received(&mut self, _raw: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    /// A piece of the response body
    ///
    /// In `Buffered` mode there is a single call with `end == true`;
    /// in `Progressive` mode any number of partial calls precede it.
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<(), Error>;

    /// The stream is finished, successfully or not
    fn completed(&mut self, result: Result<(), Error>);
}

/// Lifecycle of a stream
///
/// Reading may begin while the request body is still being written
/// (that's how 1xx flows work), but a stream only completes once both
/// directions are finished.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamState {
    Unactivated,
    /// Queued for writing
    Pending,
    Writing,
    /// Response bytes arrived before the request body was done
    WritingAndReading,
    /// Request fully written, response pending or in progress
    Reading,
    Done(Option<Error>),
}

pub struct StreamInner {
    pub state: StreamState,
    pub request: Request,
    pub encoder: Option<Encoder>,
    pub chunks: ChunkQueue,
    pub codec: Box<Codec>,
    pub is_head: bool,
    /// The request carries `Connection: close`
    pub wants_close: bool,
    /// Decoder delivered end-of-message
    pub read_done: bool,
    pub result: Option<Result<(), Error>>,
    /// Whether the connection was still open when the stream finished
    pub open_at_completion: Option<bool>,
}

/// The shared stream object
///
/// `activated` and `terminated` are checked synchronously on the
/// caller's thread; everything else is I/O-thread territory.
pub struct Stream {
    pub activated: AtomicBool,
    pub terminated: AtomicBool,
    /// Activated-and-unfinished streams on the connection; the slot
    /// taken at activation is released on completion
    in_flight: Arc<AtomicUsize>,
    inner: Mutex<StreamInner>,
}

impl Stream {
    pub fn new(request: Request, codec: Box<Codec>,
        in_flight: Arc<AtomicUsize>)
        -> Stream
    {
        let is_head = request.is_head();
        let wants_close = request.is_close();
        Stream {
            activated: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            in_flight: in_flight,
            inner: Mutex::new(StreamInner {
                state: StreamState::Unactivated,
                request: request,
                encoder: None,
                chunks: ChunkQueue::new(),
                codec: codec,
                is_head: is_head,
                wants_close: wants_close,
                read_done: false,
                result: None,
                open_at_completion: None,
            }),
        }
    }

    pub fn lock(&self) -> ::std::sync::MutexGuard<StreamInner> {
        self.inner.lock().expect("stream lock poisoned")
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.lock().state, StreamState::Done(..))
    }

    /// Terminal transition through the shared object
    ///
    /// Fires the codec's `completed` callback and gives the stream's
    /// in-flight slot back, both exactly once.
    pub fn complete(&self, result: Result<(), Error>, conn_open: bool) {
        let fired = self.lock().complete(result, conn_open);
        if fired && self.activated.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl StreamInner {
    /// `Unactivated -> Pending`, builds the encoder
    pub fn activate(&mut self) -> Result<(), Error> {
        debug_assert_eq!(self.state, StreamState::Unactivated);
        self.encoder = Some(Encoder::new(&mut self.request)?);
        self.state = StreamState::Pending;
        Ok(())
    }

    /// `Pending -> Writing`, the encoder selected this stream
    pub fn begin_write(&mut self) {
        if self.state == StreamState::Pending {
            self.state = StreamState::Writing;
        }
    }

    /// Response bytes arrived for this stream
    pub fn note_read(&mut self) {
        if self.state == StreamState::Writing {
            self.state = StreamState::WritingAndReading;
        }
    }

    /// The request is fully on the wire
    pub fn finish_write(&mut self) {
        match self.state {
            StreamState::Writing | StreamState::WritingAndReading => {
                self.state = StreamState::Reading;
            }
            ref state => {
                debug_assert!(matches!(*state, StreamState::Done(..)),
                    "finish_write in state {:?}", state);
            }
        }
    }

    pub fn write_begun(&self) -> bool {
        !matches!(self.state,
            StreamState::Unactivated | StreamState::Pending)
    }

    pub fn write_done(&self) -> bool {
        match self.state {
            StreamState::Reading | StreamState::Done(..) => true,
            _ => self.encoder.as_ref().map(|e| e.is_done())
                    .unwrap_or(false),
        }
    }

    /// Terminal transition; fires `completed` exactly once
    ///
    /// `conn_open` records whether the connection was still open at
    /// this point; callers read it back through
    /// `StreamRef::connection_was_open`. Returns false when the
    /// stream was already done.
    pub fn complete(&mut self, result: Result<(), Error>,
        conn_open: bool)
        -> bool
    {
        if matches!(self.state, StreamState::Done(..)) {
            return false;
        }
        trace!("stream done: {:?}", result);
        self.state = StreamState::Done(result.as_ref().err().cloned());
        self.result = Some(result.clone());
        self.open_at_completion = Some(conn_open);
        let err = match result {
            Ok(()) => Error::Cancelled,
            Err(ref err) => err.clone(),
        };
        self.chunks.cancel(&err);
        self.codec.completed(result);
        true
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use request::Request;
    use client::{Error, RecvMode};
    use client::parser::Head;
    use super::{Codec, Stream, StreamState};

    struct Null;

    impl Codec for Null {
        fn headers_received(&mut self, _head: &Head)
            -> Result<RecvMode, Error>
        {
            Ok(RecvMode::Buffered(1024))
        }
        fn data_received(&mut self, _data: &[u8], _end: bool)
            -> Result<(), Error>
        {
            Ok(())
        }
        fn completed(&mut self, _result: Result<(), Error>) {}
    }

    fn stream(in_flight: &Arc<AtomicUsize>) -> Stream {
        Stream::new(Request::new("GET", "/"), Box::new(Null),
            in_flight.clone())
    }

    #[test]
    fn lifecycle() {
        let stream = stream(&Arc::new(AtomicUsize::new(0)));
        {
            let mut inner = stream.lock();
            assert_eq!(inner.state, StreamState::Unactivated);
            assert!(!inner.write_begun());
            inner.activate().unwrap();
            assert_eq!(inner.state, StreamState::Pending);
            inner.begin_write();
            assert!(inner.write_begun());
            inner.note_read();
            assert_eq!(inner.state, StreamState::WritingAndReading);
            inner.finish_write();
            assert_eq!(inner.state, StreamState::Reading);
            inner.complete(Ok(()), true);
        }
        assert!(stream.is_complete());
    }

    #[test]
    fn complete_is_terminal() {
        let stream = stream(&Arc::new(AtomicUsize::new(0)));
        let mut inner = stream.lock();
        inner.activate().unwrap();
        inner.complete(Err(Error::Cancelled), false);
        inner.complete(Ok(()), true);
        assert_eq!(inner.state,
            StreamState::Done(Some(Error::Cancelled)));
        assert_eq!(inner.result, Some(Err(Error::Cancelled)));
        assert_eq!(inner.open_at_completion, Some(false));
    }

    #[test]
    fn in_flight_slot_released_once() {
        let counter = Arc::new(AtomicUsize::new(1));
        let stream = stream(&counter);
        stream.activated.store(true, Ordering::SeqCst);
        stream.complete(Ok(()), true);
        stream.complete(Err(Error::Cancelled), true);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
