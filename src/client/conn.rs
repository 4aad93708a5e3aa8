//! The connection state machine
//!
//! One `Connection` drives one client-side HTTP/1.1 connection inside
//! a byte pipeline. Everything here runs on the I/O thread; the
//! user-facing handles marshal their calls through a small op queue
//! and a `Wakeup`, so they are safe from any thread and eventually
//! consistent.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use netbuf::Buf;

use channel::{Channel, Direction, Downstream, OutBuf, Wakeup};
use chunk::Chunk;
use request::Request;
use client::{Config, Error};
use client::encoder::Progress;
use client::parser::{Outcome, Parser};
use client::stream::{Codec, Stream, StreamInner, StreamState};


enum Op {
    Activate(Arc<Stream>),
    Chunk(Arc<Stream>, Chunk),
    UpdateWindow(usize),
    Close,
}

struct Shared {
    ops: Mutex<VecDeque<Op>>,
    open: AtomicBool,
    new_requests: AtomicBool,
    switched: AtomicBool,
    /// Activated streams that have not completed yet
    in_flight: Arc<AtomicUsize>,
    inflight_limit: usize,
    wakeup: Box<Wakeup>,
}

impl Shared {
    fn post(&self, op: Op) {
        self.ops.lock().expect("op queue lock").push_back(op);
        self.wakeup.notify();
    }
}

/// A cloneable, thread-safe handle to the connection
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Create a stream for `request`
    ///
    /// The stream is not queued until `StreamRef::activate`. Fails
    /// immediately when the connection no longer takes requests.
    pub fn make_request(&self, request: Request, codec: Box<Codec>)
        -> Result<StreamRef, Error>
    {
        if self.shared.switched.load(Ordering::SeqCst) {
            return Err(Error::SwitchedProtocols);
        }
        if !self.shared.open.load(Ordering::SeqCst) ||
            !self.shared.new_requests.load(Ordering::SeqCst)
        {
            return Err(Error::ConnectionClosed);
        }
        // surface framing-header mistakes to the caller, not the codec
        request.body_kind()?;
        Ok(StreamRef {
            stream: Arc::new(Stream::new(request, codec,
                self.shared.in_flight.clone())),
            conn: self.shared.clone(),
        })
    }

    /// Initiate graceful shutdown
    ///
    /// `is_open` flips immediately; in-flight streams unwind with
    /// `Cancelled` once the I/O thread picks the call up.
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.new_requests.store(false, Ordering::SeqCst);
        self.shared.post(Op::Close);
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn new_requests_allowed(&self) -> bool {
        self.shared.new_requests.load(Ordering::SeqCst)
    }

    /// Add `n` bytes of read-window credit
    pub fn update_window(&self, n: usize) {
        self.shared.post(Op::UpdateWindow(n));
    }
}

/// The user's half of a stream
///
/// The connection holds the other reference; the stream object lives
/// until both are gone.
#[derive(Clone)]
pub struct StreamRef {
    stream: Arc<Stream>,
    conn: Arc<Shared>,
}

impl StreamRef {
    /// Queue the stream for writing
    ///
    /// Requests go to the wire in activation order. Calling this
    /// twice is a usage error; `Busy` means the in-flight limit is
    /// reached and the call may be retried once a stream completes.
    pub fn activate(&self) -> Result<(), Error> {
        if self.stream.activated.load(Ordering::SeqCst) {
            return Err(Error::AlreadyActivated);
        }
        if !self.conn.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        if self.conn.in_flight.fetch_add(1, Ordering::SeqCst) >=
            self.conn.inflight_limit
        {
            self.conn.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Busy);
        }
        if self.stream.activated.swap(true, Ordering::SeqCst) {
            self.conn.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::AlreadyActivated);
        }
        self.conn.post(Op::Activate(self.stream.clone()));
        Ok(())
    }

    /// Enqueue a chunk for a chunked request body
    ///
    /// Safe from any thread. A zero-sized chunk terminates the body.
    ///
    /// # Panics
    ///
    /// When a chunk is enqueued after the terminator.
    pub fn write_chunk(&self, chunk: Chunk) -> Result<(), Error> {
        if chunk.is_terminator() {
            if self.stream.terminated.swap(true, Ordering::SeqCst) {
                panic!("chunk enqueued after the terminating chunk");
            }
        } else if self.stream.terminated.load(Ordering::SeqCst) {
            panic!("chunk enqueued after the terminating chunk");
        }
        if self.stream.is_complete() {
            // the chunk is dropped and its callback fires `Cancelled`
            return Err(Error::Cancelled);
        }
        self.conn.post(Op::Chunk(self.stream.clone(), chunk));
        Ok(())
    }

    /// Add `n` bytes of read-window credit
    pub fn update_window(&self, n: usize) {
        self.conn.post(Op::UpdateWindow(n));
    }

    pub fn is_complete(&self) -> bool {
        self.stream.is_complete()
    }

    /// Completion result, once the stream is done
    pub fn result(&self) -> Option<Result<(), Error>> {
        self.stream.lock().result.clone()
    }

    /// Whether the connection was still open when the stream
    /// completed; `None` while the stream is running
    pub fn connection_was_open(&self) -> Option<bool> {
        self.stream.lock().open_at_completion
    }
}

/// A client-side HTTP/1.1 connection mounted in a byte pipeline
///
/// The owning driver calls `dispatch`, `data_received` and
/// `shutdown_received` from the I/O thread; users talk to it through
/// `ConnectionHandle` and `StreamRef`.
pub struct Connection<C> {
    channel: C,
    config: Arc<Config>,
    shared: Arc<Shared>,
    /// Activation order; front is the oldest incomplete stream
    streams: VecDeque<Arc<Stream>>,
    parser: Parser,
    in_buf: Buf,
    window: usize,
    downstream: Option<Box<Downstream>>,
    peer_read_closed: bool,
    write_closed: bool,
    /// Close observed in a request or response; shut down once the
    /// in-flight streams drain
    close_after_drain: bool,
    any_completed: bool,
    finished: bool,
}

impl<C: Channel> Connection<C> {
    pub fn new(channel: C, wakeup: Box<Wakeup>, config: &Arc<Config>)
        -> Connection<C>
    {
        Connection {
            channel: channel,
            config: config.clone(),
            shared: Arc::new(Shared {
                ops: Mutex::new(VecDeque::new()),
                open: AtomicBool::new(true),
                new_requests: AtomicBool::new(true),
                switched: AtomicBool::new(false),
                in_flight: Arc::new(AtomicUsize::new(0)),
                inflight_limit: config.inflight_request_limit,
                wakeup: wakeup,
            }),
            streams: VecDeque::new(),
            parser: Parser::new(),
            in_buf: Buf::new(),
            window: config.initial_read_window,
            downstream: None,
            peer_read_closed: false,
            write_closed: false,
            close_after_drain: false,
            any_completed: false,
            finished: false,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// True once the connection has shut down and unwound its streams
    pub fn is_closed(&self) -> bool {
        self.finished
    }

    pub fn is_switched(&self) -> bool {
        self.shared.switched.load(Ordering::SeqCst)
    }

    /// Install the handler that owns the bytes after a `101`
    pub fn install_downstream(&mut self, handler: Box<Downstream>) {
        self.downstream = Some(handler);
        if self.is_switched() && self.in_buf.len() > 0 {
            let buf = mem::replace(&mut self.in_buf, Buf::new());
            self.forward_downstream(&buf[..]);
        }
    }

    /// Drain marshalled user calls and advance the state machine
    pub fn dispatch(&mut self) {
        let ops = mem::replace(
            &mut *self.shared.ops.lock().expect("op queue lock"),
            VecDeque::new());
        for op in ops {
            match op {
                Op::Activate(stream) => self.do_activate(stream),
                Op::Chunk(stream, chunk) => {
                    let mut inner = stream.lock();
                    if !matches!(inner.state, StreamState::Done(..)) {
                        inner.chunks.push(chunk);
                    }
                    // a chunk for a dead stream is dropped and its
                    // callback reports the cancellation
                }
                Op::UpdateWindow(n) => {
                    self.window += n;
                    self.channel.increment_read_window(n);
                }
                Op::Close => {
                    self.shutdown(Error::Cancelled, Ok(()));
                }
            }
        }
        self.advance();
    }

    /// Inbound bytes delivered by the pipeline
    pub fn data_received(&mut self, data: &[u8]) {
        if self.is_switched() {
            self.forward_downstream(data);
            return;
        }
        self.in_buf.extend(data);
        self.poll_read();
        self.poll_write();
        self.maybe_drain_shutdown();
    }

    /// Pipeline shutdown notification for one direction
    pub fn shutdown_received(&mut self, dir: Direction,
        result: Result<(), Error>)
    {
        if self.is_switched() {
            if let Some(ref mut handler) = self.downstream {
                handler.shutdown_received(dir, result);
            }
            match dir {
                Direction::Read => self.peer_read_closed = true,
                Direction::Write => self.write_closed = true,
            }
            if self.peer_read_closed && self.write_closed {
                self.shared.open.store(false, Ordering::SeqCst);
                self.finished = true;
            }
            return;
        }
        match dir {
            Direction::Read => {
                self.peer_read_closed = true;
                // close-delimited bodies finish here; truncated
                // messages surface ResetOnHeaders/ResetOnBody
                self.poll_read();
                if self.finished {
                    return;
                }
                let err = match result {
                    // a clean pipeline shutdown still leaves the
                    // unfinished streams with a non-success code
                    Ok(()) => Error::Cancelled,
                    Err(err) => err,
                };
                self.shutdown(err, Ok(()));
            }
            Direction::Write => {
                self.write_closed = true;
                let stuck = self.streams.iter()
                    .any(|s| !s.lock().write_done());
                if stuck {
                    let err = match result {
                        Ok(()) => Error::Cancelled,
                        Err(err) => err,
                    };
                    self.shutdown(err, Ok(()));
                }
            }
        }
    }

    /// Push raw bytes to the peer after a protocol switch
    ///
    /// Returns the number of bytes taken; the rest didn't fit into
    /// the buffers the pipeline would lease right now.
    ///
    /// # Panics
    ///
    /// When the connection hasn't switched protocols.
    pub fn write_through(&mut self, data: &[u8]) -> Result<usize, Error> {
        if !self.is_switched() {
            panic!("write_through before the protocol switch");
        }
        if self.write_closed {
            return Err(Error::ConnectionClosed);
        }
        let mut off = 0;
        while off < data.len() {
            let mut buf = match self.channel
                .acquire_outbound(self.config.out_buffer_size)
            {
                Some(buf) => buf,
                None => break,
            };
            off += buf.write(&data[off..]);
            self.channel.commit_outbound(buf);
        }
        Ok(off)
    }

    fn advance(&mut self) {
        self.poll_write();
        self.poll_read();
        self.maybe_drain_shutdown();
    }

    /// Complete a stream, recording whether the connection was still
    /// open at that moment
    fn complete_stream(&self, stream: &Stream,
        result: Result<(), Error>)
    {
        stream.complete(result,
            self.shared.open.load(Ordering::SeqCst));
    }

    fn do_activate(&mut self, stream: Arc<Stream>) {
        if self.shared.switched.load(Ordering::SeqCst) {
            self.complete_stream(&stream,
                Err(Error::SwitchedProtocols));
            return;
        }
        if self.finished || !self.shared.open.load(Ordering::SeqCst) ||
            !self.shared.new_requests.load(Ordering::SeqCst)
        {
            // queued past the close point, never touches the wire
            self.complete_stream(&stream, Err(Error::ConnectionClosed));
            return;
        }
        let outcome = {
            let mut inner = stream.lock();
            let wants_close = inner.wants_close;
            inner.activate().map(|()| wants_close)
        };
        match outcome {
            Ok(wants_close) => {
                if wants_close {
                    debug!("request asks for connection close");
                    self.shared.new_requests
                        .store(false, Ordering::SeqCst);
                    self.close_after_drain = true;
                }
                self.streams.push_back(stream);
            }
            Err(err) => {
                self.complete_stream(&stream, Err(err));
            }
        }
    }

    fn forward_downstream(&mut self, data: &[u8]) {
        match self.downstream {
            Some(ref mut handler) => handler.data_received(data),
            None => {
                debug!("data after protocol switch with no downstream");
                self.shutdown(Error::UnexpectedData,
                    Err(Error::UnexpectedData));
            }
        }
    }

    fn maybe_drain_shutdown(&mut self) {
        if !self.finished && self.close_after_drain &&
            self.streams.is_empty()
        {
            self.shutdown(Error::ConnectionClosed, Ok(()));
        }
    }

    /// Tear the connection down, unwinding every remaining stream
    fn shutdown(&mut self, stream_err: Error,
        channel_result: Result<(), Error>)
    {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.new_requests.store(false, Ordering::SeqCst);
        if channel_result.is_err() {
            debug!("connection failed: {:?}", channel_result);
        }
        while let Some(stream) = self.streams.pop_front() {
            self.complete_stream(&stream, Err(stream_err.clone()));
        }
        self.channel.shutdown(Direction::Read, channel_result.clone());
        self.channel.shutdown(Direction::Write, channel_result);
    }

    /// Complete the front stream once both directions are done
    fn try_complete_front(&mut self) {
        let done = match self.streams.front() {
            Some(front) => {
                let inner = front.lock();
                inner.read_done && inner.write_done()
            }
            None => false,
        };
        if done {
            let front = self.streams.pop_front()
                .expect("front stream present");
            self.complete_stream(&front, Ok(()));
            self.any_completed = true;
        }
    }

    /// Fail every queued stream that hasn't reached the wire
    fn drop_unwritten(&mut self) {
        let mut keep = 0;
        for (idx, stream) in self.streams.iter().enumerate() {
            if stream.lock().write_begun() {
                keep = idx + 1;
            }
        }
        let tail = self.streams.split_off(keep);
        for stream in tail {
            self.complete_stream(&stream, Err(Error::ConnectionClosed));
        }
    }

    fn poll_write(&mut self) {
        if self.finished || self.write_closed || self.is_switched() {
            return;
        }
        let mut out: Option<OutBuf> = None;
        loop {
            let target = {
                let mut found = None;
                for stream in self.streams.iter() {
                    if !stream.lock().write_done() {
                        found = Some(stream.clone());
                        break;
                    }
                }
                found
            };
            let target = match target {
                Some(target) => target,
                None => break,
            };
            let mut buf = match out.take() {
                Some(buf) => buf,
                None => {
                    match self.channel
                        .acquire_outbound(self.config.out_buffer_size)
                    {
                        Some(buf) => buf,
                        // pipeline is out of buffers; resume when it
                        // ticks us again
                        None => return,
                    }
                }
            };
            let result = {
                let mut inner = target.lock();
                inner.begin_write();
                let StreamInner {
                    ref mut encoder, ref mut chunks, ..
                } = *inner;
                encoder.as_mut().expect("writing stream has an encoder")
                    .fill(&mut buf, chunks)
            };
            match result {
                Err(err) => {
                    if !buf.is_empty() {
                        // everything up to the truncation point still
                        // goes to the wire
                        self.channel.commit_outbound(buf);
                    }
                    self.complete_stream(&target, Err(err.clone()));
                    if let Some(pos) = self.streams.iter()
                        .position(|s| Arc::ptr_eq(s, &target))
                    {
                        self.streams.remove(pos);
                    }
                    self.shutdown(err.clone(), Err(err));
                    return;
                }
                Ok(Progress::Done) => {
                    target.lock().finish_write();
                    out = Some(buf);
                    self.try_complete_front();
                }
                Ok(Progress::BufferFull) => {
                    self.channel.commit_outbound(buf);
                }
                Ok(Progress::Parked) => {
                    if !buf.is_empty() {
                        self.channel.commit_outbound(buf);
                    }
                    return;
                }
            }
        }
        if let Some(buf) = out {
            if !buf.is_empty() {
                self.channel.commit_outbound(buf);
            }
        }
    }

    fn poll_read(&mut self) {
        loop {
            if self.finished {
                return;
            }
            if self.is_switched() {
                if self.in_buf.len() > 0 {
                    let buf = mem::replace(&mut self.in_buf, Buf::new());
                    self.forward_downstream(&buf[..]);
                }
                return;
            }
            let front = match self.streams.front() {
                Some(front) => front.clone(),
                None => {
                    if self.in_buf.len() == 0 {
                        return;
                    }
                    let err = if self.any_completed {
                        Error::UnexpectedData
                    } else {
                        Error::PrematureResponse
                    };
                    self.shutdown(err.clone(), Err(err));
                    return;
                }
            };
            {
                let inner = front.lock();
                if inner.read_done {
                    // response is in, the request body isn't out yet;
                    // later responses wait for ordering
                    return;
                }
                if !inner.write_begun() {
                    if self.in_buf.len() == 0 {
                        return;
                    }
                    drop(inner);
                    self.shutdown(Error::PrematureResponse,
                        Err(Error::PrematureResponse));
                    return;
                }
            }
            if self.in_buf.len() == 0 && !self.peer_read_closed {
                return;
            }
            let outcome = {
                let mut inner = front.lock();
                inner.note_read();
                let is_head = inner.is_head;
                self.parser.parse(&mut self.in_buf, &mut self.window,
                    &mut *inner.codec, is_head, self.peer_read_closed)
            };
            match outcome {
                Err(err) => {
                    self.complete_stream(&front, Err(err.clone()));
                    if let Some(pos) = self.streams.iter()
                        .position(|s| Arc::ptr_eq(s, &front))
                    {
                        self.streams.remove(pos);
                    }
                    self.shutdown(err.clone(), Err(err));
                    return;
                }
                Ok(Outcome::NotReady) => return,
                Ok(Outcome::Switched) => {
                    self.handle_switch(front);
                    return;
                }
                Ok(Outcome::Complete { close }) => {
                    let refund = self.parser.take_framing_spent();
                    self.window += refund;
                    self.channel.increment_read_window(refund);
                    self.parser = Parser::new();
                    front.lock().read_done = true;
                    if close {
                        debug!("peer asked for connection close");
                        self.shared.new_requests
                            .store(false, Ordering::SeqCst);
                        self.close_after_drain = true;
                        self.drop_unwritten();
                    }
                    self.try_complete_front();
                }
            }
        }
    }

    fn handle_switch(&mut self, front: Arc<Stream>) {
        debug!("peer switched protocols");
        let refund = self.parser.take_framing_spent();
        self.window += refund;
        self.channel.increment_read_window(refund);
        self.shared.new_requests.store(false, Ordering::SeqCst);
        self.shared.switched.store(true, Ordering::SeqCst);
        if let Some(pos) = self.streams.iter()
            .position(|s| Arc::ptr_eq(s, &front))
        {
            self.streams.remove(pos);
        }
        front.lock().read_done = true;
        self.complete_stream(&front, Ok(()));
        self.any_completed = true;
        let tail = mem::replace(&mut self.streams, VecDeque::new());
        for stream in tail {
            self.complete_stream(&stream,
                Err(Error::SwitchedProtocols));
        }
        if self.in_buf.len() > 0 {
            if self.downstream.is_some() {
                let buf = mem::replace(&mut self.in_buf, Buf::new());
                self.forward_downstream(&buf[..]);
            } else {
                self.shutdown(Error::UnexpectedData,
                    Err(Error::UnexpectedData));
            }
        }
    }
}
