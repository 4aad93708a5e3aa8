//! Incremental response parsing
//!
//! The parser is fed from the connection's inbound buffer and is
//! resilient to arbitrary fragmentation: every field may arrive one
//! byte per delivery and the resulting callback sequence is identical
//! to an all-at-once delivery.

use std::mem;
use std::str::from_utf8;

use httparse;
use netbuf::Buf;

use body_parser::BodyProgress;
use chunked;
use headers;
use client::Error;
use client::stream::{Codec, RecvMode};

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;


/// Framing of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
    /// Delimited by connection close
    Eof,
}

/// A borrowed view of one response header block
///
/// Passed to `Codec::headers_received` and `Codec::info_received`;
/// store whatever fields you need, the borrow ends with the call.
#[derive(Debug)]
pub struct Head<'a> {
    pub code: u16,
    pub reason: &'a str,
    pub headers: &'a [httparse::Header<'a>],
    pub body_kind: BodyKind,
    pub close: bool,
}

/// What a parsing pass accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Need more bytes or more window credit
    NotReady,
    /// End of message; `close` is the connection-close flag of the
    /// final header block
    Complete { close: bool },
    /// A `101` terminated the stream; bytes left in the buffer belong
    /// to the next protocol
    Switched,
}

enum State {
    Headers,
    Body { mode: RecvMode, progress: BodyProgress },
    Done,
    Void,
}

enum Block {
    Partial,
    /// Block is parsed but the window can't cover it yet
    Stalled,
    Info,
    Switched,
    Final { mode: RecvMode, body: BodyKind, close: bool },
}

/// Body length rules for responses
///
/// 1. For HEAD, 1xx, 204, 304 -- no body
/// 2. If the last transfer coding is chunked -> Chunked
/// 3. If Content-Length -> Fixed
/// 4. Else -> delimited by end of stream
fn scan_headers(is_head: bool, code: u16, headers: &[httparse::Header])
    -> Result<(BodyKind, bool), Error>
{
    let mut close = false;
    let mut has_content_length = false;
    let mut result = BodyKind::Eof;
    let bodyless = is_head ||
        (code >= 100 && code < 200) || code == 204 || code == 304;
    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Transfer-Encoding") {
            if headers::last_token_chunked(header.value) {
                if has_content_length {
                    // coding wins, but the message is too ambiguous
                    // to reuse the connection after
                    close = true;
                }
                result = BodyKind::Chunked;
            }
        } else if header.name.eq_ignore_ascii_case("Content-Length") {
            if has_content_length {
                return Err(Error::DuplicateContentLength);
            }
            has_content_length = true;
            if result != BodyKind::Chunked {
                let value = from_utf8(header.value)
                    .map_err(|_| Error::BadContentLength)?;
                let len = value.trim().parse()
                    .map_err(|_| Error::BadContentLength)?;
                result = BodyKind::Fixed(len);
            } else {
                close = true;
            }
        } else if header.name.eq_ignore_ascii_case("Connection") {
            if headers::connection_close(header.value) {
                close = true;
            }
        }
    }
    if bodyless {
        return Ok((BodyKind::Fixed(0), close));
    }
    Ok((result, close))
}

fn new_body(body: BodyKind, mode: &RecvMode)
    -> Result<BodyProgress, Error>
{
    match (body, mode) {
        (BodyKind::Fixed(x), &RecvMode::Buffered(max))
            if x > max as u64
        => Err(Error::BodyTooLong),
        (BodyKind::Fixed(x), _) => Ok(BodyProgress::Fixed(x)),
        (BodyKind::Chunked, _) => {
            Ok(BodyProgress::Chunked(chunked::State::new()))
        }
        (BodyKind::Eof, _) => Ok(BodyProgress::Eof),
    }
}

pub struct Parser {
    state: State,
    close: bool,
    /// Framing bytes charged to the window since the message started,
    /// refunded when it completes
    framing_spent: usize,
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            state: State::Headers,
            close: false,
            framing_spent: 0,
        }
    }

    /// Window credit charged for framing, to refund on completion
    pub fn take_framing_spent(&mut self) -> usize {
        mem::replace(&mut self.framing_spent, 0)
    }

    /// Advance over whatever `buf` holds, within the window
    ///
    /// `is_head` tells whether the originating request was HEAD (it
    /// changes body framing), `peer_closed` that no more inbound bytes
    /// will ever arrive.
    pub fn parse(&mut self, buf: &mut Buf, window: &mut usize,
        codec: &mut Codec, is_head: bool, peer_closed: bool)
        -> Result<Outcome, Error>
    {
        loop {
            match mem::replace(&mut self.state, State::Void) {
                State::Headers => {
                    match self.parse_block(buf, window, codec, is_head)? {
                        Block::Partial => {
                            self.state = State::Headers;
                            if peer_closed {
                                return Err(Error::ResetOnHeaders);
                            }
                            return Ok(Outcome::NotReady);
                        }
                        Block::Stalled => {
                            self.state = State::Headers;
                            return Ok(Outcome::NotReady);
                        }
                        Block::Info => {
                            self.state = State::Headers;
                        }
                        Block::Switched => {
                            self.state = State::Done;
                            return Ok(Outcome::Switched);
                        }
                        Block::Final { mode, body, close } => {
                            self.close = close;
                            let progress = new_body(body, &mode)?;
                            self.state = State::Body {
                                mode: mode,
                                progress: progress,
                            };
                        }
                    }
                }
                State::Body { mode, mut progress } => {
                    let spent = progress.parse(buf, *window)?;
                    *window -= spent;
                    self.framing_spent += spent;
                    for ext in progress.take_extensions() {
                        codec.extensions_received(&ext)
                            .map_err(|_| Error::CallbackError)?;
                    }
                    let (bytes, done) = progress.check_buf(buf, peer_closed);
                    match mode {
                        RecvMode::Buffered(max) => {
                            if bytes > max {
                                return Err(Error::BodyTooLong);
                            }
                            if !done {
                                self.state = State::Body {
                                    mode: mode,
                                    progress: progress,
                                };
                                if peer_closed {
                                    return Err(Error::ResetOnBody);
                                }
                                return Ok(Outcome::NotReady);
                            }
                            if *window < bytes {
                                self.state = State::Body {
                                    mode: mode,
                                    progress: progress,
                                };
                                return Ok(Outcome::NotReady);
                            }
                            codec.data_received(&buf[..bytes], true)
                                .map_err(|_| Error::CallbackError)?;
                            progress.consume(buf, bytes);
                            *window -= bytes;
                            self.state = State::Done;
                            return Ok(Outcome::Complete {
                                close: self.close,
                            });
                        }
                        RecvMode::Progressive => {
                            let deliver =
                                ::std::cmp::min(bytes, *window);
                            let end = done && deliver == bytes;
                            if deliver == 0 && !end {
                                self.state = State::Body {
                                    mode: mode,
                                    progress: progress,
                                };
                                if peer_closed && !done {
                                    return Err(Error::ResetOnBody);
                                }
                                return Ok(Outcome::NotReady);
                            }
                            codec.data_received(&buf[..deliver], end)
                                .map_err(|_| Error::CallbackError)?;
                            progress.consume(buf, deliver);
                            *window -= deliver;
                            if end {
                                self.state = State::Done;
                                return Ok(Outcome::Complete {
                                    close: self.close,
                                });
                            }
                            self.state = State::Body {
                                mode: mode,
                                progress: progress,
                            };
                            if peer_closed && !done {
                                return Err(Error::ResetOnBody);
                            }
                            return Ok(Outcome::NotReady);
                        }
                    }
                }
                State::Done => {
                    self.state = State::Done;
                    return Ok(Outcome::Complete { close: self.close });
                }
                State::Void => unreachable!(),
            }
        }
    }

    fn parse_block(&mut self, buf: &mut Buf, window: &mut usize,
        codec: &mut Codec, is_head: bool)
        -> Result<Block, Error>
    {
        let (block, bytes) = {
            let mut vec;
            let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
            let (code, reason, headers, bytes) = {
                let mut raw = httparse::Response::new(&mut headers);
                let mut result = raw.parse(&buf[..]);
                if matches!(result, Err(httparse::Error::TooManyHeaders)) {
                    vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
                    raw = httparse::Response::new(&mut vec);
                    result = raw.parse(&buf[..]);
                }
                match result? {
                    httparse::Status::Complete(bytes) => {
                        let code = raw.code.unwrap();
                        (code, raw.reason.unwrap_or(""),
                         raw.headers, bytes)
                    }
                    httparse::Status::Partial => {
                        return Ok(Block::Partial);
                    }
                }
            };
            if *window < bytes {
                return Ok(Block::Stalled);
            }
            let (body, close) = scan_headers(is_head, code, headers)?;
            let head = Head {
                code: code,
                reason: reason,
                headers: headers,
                body_kind: body,
                close: close,
            };
            let block = if code == 101 {
                // not an informational response: the stream ends here
                // and the connection becomes someone else's
                codec.headers_received(&head)
                    .map_err(|_| Error::CallbackError)?;
                Block::Switched
            } else if code >= 100 && code < 200 {
                codec.info_received(&head)
                    .map_err(|_| Error::CallbackError)?;
                Block::Info
            } else {
                let mode = codec.headers_received(&head)
                    .map_err(|_| Error::CallbackError)?;
                Block::Final {
                    mode: mode,
                    body: body,
                    close: close,
                }
            };
            (block, bytes)
        };
        buf.consume(bytes);
        *window -= bytes;
        self.framing_spent += bytes;
        Ok(block)
    }
}
