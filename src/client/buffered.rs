//! Simple to use wrappers for dealing with fully buffered responses
//!
//! By "fully buffered" I mean two things:
//!
//! * No response streaming
//! * All headers and body are allocated on the heap
//!
//! Raw codecs allow more granular control to make things more
//! efficient, but require more boilerplate. You can mix and match
//! different styles on a single HTTP connection.
//!
use url::Url;
use futures::sync::oneshot::{channel, Sender, Receiver};

use request::Request;
use client::{Codec, Error, Head, RecvMode};

/// Fully buffered (in-memory) reading of a response
///
/// This codec should be used when you don't have any special needs
pub struct Buffered {
    sender: Option<Sender<Result<Response, Error>>>,
    response: Option<Response>,
    max_response_length: usize,
}

#[derive(Debug)]
/// A buffered response holds the whole body as a contiguous chunk of
/// data, plus any informational header blocks that preceded it
pub struct Response {
    status: u16,
    reason: String,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
    informational: Vec<(u16, Vec<(String, Vec<u8>)>)>,
}

impl Response {
    /// Get response status
    pub fn status(&self) -> u16 {
        self.status
    }
    /// Get the reason string as received
    pub fn reason(&self) -> &str {
        &self.reason
    }
    /// Get response headers
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }
    /// Get response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
    /// Informational (1xx) header blocks that preceded the response
    pub fn informational(&self)
        -> &[(u16, Vec<(String, Vec<u8>)>)]
    {
        &self.informational
    }
}

fn copy_headers(head: &Head) -> Vec<(String, Vec<u8>)> {
    head.headers.iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect()
}

impl Codec for Buffered {
    fn headers_received(&mut self, head: &Head)
        -> Result<RecvMode, Error>
    {
        let informational = self.response.take()
            .map(|r| r.informational).unwrap_or_else(Vec::new);
        self.response = Some(Response {
            status: head.code,
            reason: head.reason.to_string(),
            headers: copy_headers(head),
            body: Vec::new(),
            informational: informational,
        });
        Ok(RecvMode::Buffered(self.max_response_length))
    }
    fn info_received(&mut self, head: &Head) -> Result<(), Error> {
        let response = self.response.get_or_insert_with(|| Response {
            status: 0,
            reason: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            informational: Vec::new(),
        });
        response.informational.push((head.code, copy_headers(head)));
        Ok(())
    }
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<(), Error>
    {
        assert!(end);
        self.response.as_mut()
            .expect("headers arrive before data")
            .body = data.to_vec();
        Ok(())
    }
    fn completed(&mut self, result: Result<(), Error>) {
        let sender = self.sender.take()
            .expect("completed fires exactly once");
        let payload = match result {
            Ok(()) => {
                Ok(self.response.take()
                    .expect("response present on success"))
            }
            Err(err) => Err(err),
        };
        // the user may have dropped the receiver, that's fine
        let _ = sender.send(payload);
    }
}

impl Buffered {
    /// A GET request for `url` with a fully buffered response
    ///
    /// Returns the request to submit, the codec, and the receiver
    /// that yields the response (or the stream's error).
    pub fn get(url: &Url)
        -> (Request, Buffered, Receiver<Result<Response, Error>>)
    {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        let mut request = Request::new("GET", &target);
        if let Some(host) = url.host_str() {
            request.add_header("Host", host).unwrap();
        }
        let (codec, receiver) = Buffered::new();
        (request, codec, receiver)
    }

    /// A bare buffered codec to pair with a hand-built request
    pub fn new() -> (Buffered, Receiver<Result<Response, Error>>) {
        let (tx, rx) = channel();
        (Buffered {
            sender: Some(tx),
            response: None,
            max_response_length: 10_485_760,
        }, rx)
    }

    /// Set max response length for this buffered reader
    pub fn max_response_length(&mut self, value: usize) {
        self.max_response_length = value;
    }
}
