use std::sync::Arc;

use client::Config;

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            initial_read_window: 65536,
            out_buffer_size: 16384,
            inflight_request_limit: 100,
        }
    }
    /// Initial read-window credit in bytes
    ///
    /// The decoder stops consuming inbound bytes when the credit runs
    /// out. Framing bytes are refunded automatically at the end of
    /// each message; body bytes only through `update_window`.
    pub fn initial_read_window(&mut self, value: usize) -> &mut Self {
        self.initial_read_window = value;
        self
    }
    /// Size hint for leased outbound buffers
    ///
    /// The pipeline is free to lease smaller buffers; this is only
    /// what the encoder asks for.
    pub fn out_buffer_size(&mut self, value: usize) -> &mut Self {
        self.out_buffer_size = value;
        self
    }
    /// A number of in-flight requests until `activate` starts
    /// returning `Busy`
    ///
    /// An in-flight request is one that has been activated and has
    /// not completed yet. A rejected `activate` may be retried once
    /// an earlier stream finishes.
    pub fn inflight_request_limit(&mut self, value: usize) -> &mut Self {
        self.inflight_request_limit = value;
        self
    }
    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}
