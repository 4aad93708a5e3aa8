//! Scripted byte pipeline and a recording codec for the tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tk_h1_client::Request;
use tk_h1_client::channel::{Channel, Direction, Downstream, NoopWakeup,
    OutBuf};
use tk_h1_client::client::{Codec, Config, Connection, Error, Head,
    RecvMode};

pub struct MockState {
    /// Everything committed toward the peer
    pub wire: Vec<u8>,
    /// Total read-window credit pushed back upstream
    pub refunds: usize,
    pub shutdowns: Vec<(Direction, Result<(), Error>)>,
    /// Capacity of each leased buffer
    pub buffer_cap: usize,
    /// Simulate a pipeline that is out of buffers
    pub refuse_buffers: bool,
}

pub struct MockChannel(pub Arc<Mutex<MockState>>);

impl Channel for MockChannel {
    fn acquire_outbound(&mut self, _size_hint: usize) -> Option<OutBuf> {
        let state = self.0.lock().unwrap();
        if state.refuse_buffers {
            None
        } else {
            Some(OutBuf::with_capacity(state.buffer_cap))
        }
    }
    fn commit_outbound(&mut self, buf: OutBuf) {
        self.0.lock().unwrap().wire.extend_from_slice(buf.as_ref());
    }
    fn increment_read_window(&mut self, n: usize) {
        self.0.lock().unwrap().refunds += n;
    }
    fn shutdown(&mut self, dir: Direction, result: Result<(), Error>) {
        self.0.lock().unwrap().shutdowns.push((dir, result));
    }
}

pub fn mock_conn_cap(cfg: &Arc<Config>, cap: usize)
    -> (Connection<MockChannel>, Arc<Mutex<MockState>>)
{
    let state = Arc::new(Mutex::new(MockState {
        wire: Vec::new(),
        refunds: 0,
        shutdowns: Vec::new(),
        buffer_cap: cap,
        refuse_buffers: false,
    }));
    let conn = Connection::new(
        MockChannel(state.clone()), Box::new(NoopWakeup), cfg);
    (conn, state)
}

pub fn mock_conn(cfg: &Arc<Config>)
    -> (Connection<MockChannel>, Arc<Mutex<MockState>>)
{
    mock_conn_cap(cfg, 16384)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Info(u16),
    Headers(u16, bool, Vec<(String, Vec<u8>)>),
    Extensions(Vec<u8>),
    Data(Vec<u8>, bool),
    Done(Result<(), Error>),
}

pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    mode: RecvMode,
    pub fail_headers: bool,
    pub fail_data: bool,
}

impl Recorder {
    pub fn new(mode: RecvMode)
        -> (Recorder, Arc<Mutex<Vec<Event>>>)
    {
        let events = Arc::new(Mutex::new(Vec::new()));
        (Recorder {
            events: events.clone(),
            mode: mode,
            fail_headers: false,
            fail_data: false,
        }, events)
    }

    pub fn buffered() -> (Recorder, Arc<Mutex<Vec<Event>>>) {
        Recorder::new(RecvMode::Buffered(1 << 20))
    }

    /// A recorder appending to a shared log, for cross-stream
    /// ordering checks
    pub fn with_log(mode: RecvMode, events: &Arc<Mutex<Vec<Event>>>)
        -> Recorder
    {
        Recorder {
            events: events.clone(),
            mode: mode,
            fail_headers: false,
            fail_data: false,
        }
    }
}

impl Codec for Recorder {
    fn headers_received(&mut self, head: &Head)
        -> Result<RecvMode, Error>
    {
        self.events.lock().unwrap().push(Event::Headers(
            head.code, head.close,
            head.headers.iter()
                .map(|h| (h.name.to_string(), h.value.to_vec()))
                .collect()));
        if self.fail_headers {
            return Err(Error::CallbackError);
        }
        Ok(self.mode)
    }
    fn info_received(&mut self, head: &Head) -> Result<(), Error> {
        self.events.lock().unwrap().push(Event::Info(head.code));
        Ok(())
    }
    fn extensions_received(&mut self, raw: &[u8]) -> Result<(), Error> {
        self.events.lock().unwrap()
            .push(Event::Extensions(raw.to_vec()));
        Ok(())
    }
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<(), Error>
    {
        self.events.lock().unwrap()
            .push(Event::Data(data.to_vec(), end));
        if self.fail_data {
            return Err(Error::CallbackError);
        }
        Ok(())
    }
    fn completed(&mut self, result: Result<(), Error>) {
        self.events.lock().unwrap().push(Event::Done(result));
    }
}

/// Downstream handler recording the pass-through bytes
pub struct DownstreamLog {
    pub data: Arc<Mutex<Vec<u8>>>,
    pub shutdowns: Arc<Mutex<Vec<Direction>>>,
}

impl DownstreamLog {
    pub fn new() -> (DownstreamLog, Arc<Mutex<Vec<u8>>>) {
        let data = Arc::new(Mutex::new(Vec::new()));
        (DownstreamLog {
            data: data.clone(),
            shutdowns: Arc::new(Mutex::new(Vec::new())),
        }, data)
    }
}

impl Downstream for DownstreamLog {
    fn data_received(&mut self, data: &[u8]) {
        self.data.lock().unwrap().extend_from_slice(data);
    }
    fn shutdown_received(&mut self, dir: Direction,
        _result: Result<(), Error>)
    {
        self.shutdowns.lock().unwrap().push(dir);
    }
}

pub fn get_request(target: &str) -> Request {
    Request::new("GET", target)
}

pub fn init_logging() {
    let _ = ::env_logger::init();
}
