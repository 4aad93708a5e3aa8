use httparse::Error as HttpError;


quick_error! {
    #[derive(Debug, Clone, PartialEq)]
    /// Error codes surfaced on streams and from the connection API
    ///
    /// Every stream learns its fate through exactly one of these (or a
    /// clean completion); the fine-grained framing variants all belong
    /// to the protocol-error class, see `is_protocol()`.
    pub enum Error {
        /// The connection is closed or closing, the request was never sent
        ConnectionClosed {
            description("connection is closed")
        }
        /// The connection switched protocols before this request
        SwitchedProtocols {
            description("connection has switched protocols")
        }
        /// The outgoing body didn't match its declared length
        OutgoingLengthIncorrect {
            description("request body length does not match the \
                declared length")
        }
        /// A user callback failed, the stream cannot continue
        CallbackError {
            description("user callback signalled an error")
        }
        /// The stream was torn down before completing
        Cancelled {
            description("request cancelled")
        }
        /// Bytes arrived after the last response with nothing to read them
        UnexpectedData {
            description("unexpected data received after the final response")
        }
        /// Bad response status line or header section
        Header(err: HttpError) {
            description("bad response headers")
            display("bad response headers: {}", err)
            from()
        }
        /// Malformed chunk framing in the response body
        BadChunkSize {
            description("invalid chunk size line")
        }
        /// Bad `Content-Length` header
        BadContentLength {
            description("bad content length")
        }
        /// Duplicate `Content-Length` header
        DuplicateContentLength {
            description("duplicate content length")
        }
        /// Response bytes arrived before the request went to the wire
        PrematureResponse {
            description("response received before the request \
                has been written")
        }
        /// Connection reset by peer while reading response headers
        ResetOnHeaders {
            description("connection closed prematurely while \
                reading headers")
        }
        /// Connection reset by peer while reading the response body
        ResetOnBody {
            description("connection closed prematurely while \
                reading body")
        }
        /// Buffered response body exceeded the limit set by the codec
        BodyTooLong {
            description("response body too long")
        }
        /// `activate` was called twice on the same stream
        AlreadyActivated {
            description("stream has already been activated")
        }
        /// Too many requests in flight; retry once one completes
        Busy {
            description("request can't be sent because connection is busy")
        }
        /// Header name or value would break wire framing
        InvalidHeader {
            description("invalid header name or value")
        }
    }
}

impl Error {
    /// True for peer framing faults
    ///
    /// These are fatal for the connection: once framing is off, every
    /// later stream would be misaligned.
    pub fn is_protocol(&self) -> bool {
        use self::Error::*;
        matches!(*self,
            Header(..) | BadChunkSize | BadContentLength |
            DuplicateContentLength | PrematureResponse |
            ResetOnHeaders | ResetOnBody | UnexpectedData)
    }
}
