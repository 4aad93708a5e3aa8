//! The HTTP/1.x client protocol implementation
//!
mod config;
mod conn;
mod encoder;
mod errors;
mod parser;
mod proto;
mod stream;
pub mod buffered;

pub use self::errors::Error;
pub use self::conn::{Connection, ConnectionHandle, StreamRef};
pub use self::encoder::{Encoder, Progress};
pub use self::parser::{Head, BodyKind};
pub use self::proto::Proto;
pub use self::stream::{Codec, RecvMode};

/// Fine-grained configuration of the HTTP connection
#[derive(Debug, Clone)]
pub struct Config {
    initial_read_window: usize,
    out_buffer_size: usize,
    inflight_request_limit: usize,
}
