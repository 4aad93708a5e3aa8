//! Mounting a connection on a socket
//!
//! `Proto` is the byte pipeline for the common case: it owns a
//! buffered socket, leases outbound buffers backed by the socket's
//! write buffer, reads under window credit, and wakes the reactor
//! task when a user handle posts an op from another thread. The
//! reactor core it runs on is the connection's I/O thread.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{Future, Async, Poll, task};
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_core::net::TcpStream;
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use channel::{Channel, Direction, Downstream, OutBuf, Wakeup};
use client::{Config, Connection, ConnectionHandle, Error};

/// Stop leasing outbound buffers once this much is already queued
const OUT_HIGH_WATER: usize = 262_144;

struct TaskSlot(Mutex<Option<task::Task>>);

#[derive(Clone)]
struct TaskWakeup(Arc<TaskSlot>);

impl TaskWakeup {
    fn register(&self) {
        *self.0 .0.lock().expect("task slot lock") =
            Some(task::current());
    }
}

impl Wakeup for TaskWakeup {
    fn notify(&self) {
        if let Some(ref task) = *self.0 .0.lock()
            .expect("task slot lock")
        {
            task.notify();
        }
    }
}

struct SockChannel<S> {
    out: WriteBuf<S>,
    credit: usize,
    read_down: bool,
    write_down: bool,
}

impl<S: AsyncRead + AsyncWrite> Channel for SockChannel<S> {
    fn acquire_outbound(&mut self, size_hint: usize) -> Option<OutBuf> {
        if self.write_down || self.out.out_buf.len() >= OUT_HIGH_WATER {
            return None;
        }
        Some(OutBuf::with_capacity(::std::cmp::max(size_hint, 1)))
    }
    fn commit_outbound(&mut self, buf: OutBuf) {
        self.out.out_buf.extend(buf.as_ref());
    }
    fn increment_read_window(&mut self, n: usize) {
        self.credit += n;
    }
    fn shutdown(&mut self, dir: Direction, _result: Result<(), Error>) {
        match dir {
            Direction::Read => self.read_down = true,
            Direction::Write => self.write_down = true,
        }
    }
}

/// A low-level HTTP/1.x client protocol handler over a socket
///
/// Run it on the reactor as a plain future; it resolves when the
/// connection has shut down and the write buffer is flushed. Note,
/// most of the time you need some reconnection facility and/or
/// connection pooling on top of this interface.
pub struct Proto<S> {
    conn: Connection<SockChannel<S>>,
    read: ReadBuf<S>,
    wakeup: TaskWakeup,
    eof_delivered: bool,
}

impl<S: AsyncRead + AsyncWrite> Proto<S> {
    /// Create a new protocol implementation from an I/O stream
    pub fn new(sock: S, cfg: &Arc<Config>) -> Proto<S> {
        let (cout, cin) = IoBuf::new(sock).split();
        let wakeup = TaskWakeup(Arc::new(TaskSlot(Mutex::new(None))));
        let channel = SockChannel {
            out: cout,
            credit: cfg.initial_read_window,
            read_down: false,
            write_down: false,
        };
        Proto {
            conn: Connection::new(channel, Box::new(wakeup.clone()), cfg),
            read: cin,
            wakeup: wakeup,
            eof_delivered: false,
        }
    }

    /// Handle for submitting requests from any thread
    pub fn handle(&self) -> ConnectionHandle {
        self.conn.handle()
    }

    /// Install the handler that takes over after a `101` response
    pub fn install_downstream(&mut self, handler: Box<Downstream>) {
        self.conn.install_downstream(handler);
    }

    pub fn is_switched(&self) -> bool {
        self.conn.is_switched()
    }

    /// Push raw bytes to the peer after a protocol switch
    pub fn write_through(&mut self, data: &[u8])
        -> Result<usize, Error>
    {
        self.conn.write_through(data)
    }

    fn pump_in(&mut self) -> io::Result<()> {
        loop {
            let take = {
                let credit = self.conn.channel_mut().credit;
                ::std::cmp::min(credit, self.read.in_buf.len())
            };
            if take > 0 {
                self.conn.data_received(&self.read.in_buf[..take]);
                self.read.in_buf.consume(take);
                self.conn.channel_mut().credit -= take;
            }
            if self.conn.channel_mut().read_down {
                return Ok(());
            }
            // don't pull more off the socket than the window allows
            if self.read.in_buf.len() >=
                self.conn.channel_mut().credit
            {
                return Ok(());
            }
            if self.read.read()? == 0 {
                if self.read.done() && !self.eof_delivered {
                    self.eof_delivered = true;
                    self.conn.shutdown_received(
                        Direction::Read, Ok(()));
                }
                return Ok(());
            }
        }
    }
}

impl Proto<TcpStream> {
    /// A convenience method to establish a connection and create a
    /// protocol instance
    pub fn connect_tcp(addr: SocketAddr, cfg: &Arc<Config>,
        handle: &Handle)
        -> Box<Future<Item=Self, Error=io::Error>>
    {
        let cfg = cfg.clone();
        Box::new(
            TcpStream::connect(&addr, handle)
            .map(move |sock| Proto::new(sock, &cfg)))
            as Box<Future<Item=_, Error=_>>
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Proto<S> {
    type Item = ();
    type Error = io::Error;
    fn poll(&mut self) -> Poll<(), io::Error> {
        self.wakeup.register();
        self.conn.dispatch();
        if let Err(err) = self.pump_in() {
            self.conn.shutdown_received(
                Direction::Read, Err(Error::Cancelled));
            return Err(err);
        }
        if let Err(err) = self.conn.channel_mut().out.flush() {
            self.conn.shutdown_received(
                Direction::Write, Err(Error::Cancelled));
            return Err(err);
        }
        if self.conn.is_closed() &&
            self.conn.channel_mut().out.out_buf.len() == 0
        {
            return Ok(Async::Ready(()));
        }
        Ok(Async::NotReady)
    }
}
