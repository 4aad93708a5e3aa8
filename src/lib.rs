//! HTTP/1.1 client connection core for `tokio` tools
//!
//! The crate drives one pipelined client connection: request
//! encoding (including chunked bodies with extensions), incremental
//! response parsing, flow control and the `101` protocol-upgrade
//! handoff. The connection talks to the outside world through the
//! `channel` traits, so it runs over a socket (`client::Proto`) or
//! any other byte transport.
#![recursion_limit="100"]

extern crate futures;
extern crate url;
extern crate httparse;
extern crate tokio_core;
extern crate tokio_io;
extern crate netbuf;
extern crate tk_bufstream;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod channel;
pub mod client;
mod body_parser;
mod chunk;
mod chunked;
mod enums;
mod headers;
mod request;

pub use enums::Version;
pub use chunk::{Chunk, ChunkQueue};
pub use request::{BodyKind, BodySource, BufferBody, Request};
