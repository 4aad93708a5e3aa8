use netbuf::Buf;

use chunked;
use client::Error;

/// Progress of one response body over the inbound buffer
#[derive(Debug, Clone)]
pub enum BodyProgress {
    /// Content-Length framing, counts bytes left
    Fixed(u64),
    /// Chunked framing with in-place removal
    Chunked(chunked::State),
    /// Delimited by connection close
    Eof,
}

impl BodyProgress {
    /// Returns deliverable payload bytes at the buffer front and the
    /// end-of-message flag
    pub fn check_buf(&self, buf: &Buf, peer_closed: bool) -> (usize, bool) {
        use self::BodyProgress::*;
        match *self {
            Fixed(x) if x <= buf.len() as u64 => (x as usize, true),
            Fixed(_) => (buf.len(), false),
            Chunked(ref state) => (state.buffered(), state.is_done()),
            Eof => (buf.len(), peer_closed),
        }
    }

    /// Advance framing, removing at most `budget` framing bytes
    ///
    /// Returns the number of framing bytes removed; only chunked
    /// bodies have any.
    pub fn parse(&mut self, buf: &mut Buf, budget: usize)
        -> Result<usize, Error>
    {
        use self::BodyProgress::*;
        match *self {
            Fixed(_) | Eof => Ok(0),
            Chunked(ref mut state) => state.parse(buf, budget),
        }
    }

    /// Account for `n` payload bytes taken off the buffer front
    pub fn consume(&mut self, buf: &mut Buf, n: usize) {
        use self::BodyProgress::*;
        buf.consume(n);
        match *self {
            Fixed(ref mut x) => {
                assert!(*x >= n as u64);
                *x -= n as u64;
            }
            Chunked(ref mut state) => state.consume(n),
            Eof => {}
        }
    }

    /// Raw chunk extension bytes, one entry per size line that
    /// carried any, since the last call
    pub fn take_extensions(&mut self) -> Vec<Vec<u8>> {
        use self::BodyProgress::*;
        match *self {
            Chunked(ref mut state) => state.take_extensions(),
            Fixed(_) | Eof => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use netbuf::Buf;

    use chunked;
    use super::BodyProgress;

    fn filled(bytes: &[u8]) -> Buf {
        let mut buf = Buf::new();
        buf.extend(bytes);
        buf
    }

    #[test]
    fn fixed_complete() {
        let mut buf = filled(b"hello world");
        let mut progress = BodyProgress::Fixed(5);
        assert_eq!(progress.parse(&mut buf, 1000).unwrap(), 0);
        assert_eq!(progress.check_buf(&buf, false), (5, true));
        progress.consume(&mut buf, 5);
        assert_eq!(&buf[..], &b" world"[..]);
    }

    #[test]
    fn fixed_partial() {
        let buf = filled(b"hel");
        let progress = BodyProgress::Fixed(5);
        assert_eq!(progress.check_buf(&buf, false), (3, false));
    }

    #[test]
    fn eof_done_only_on_close() {
        let buf = filled(b"data");
        let progress = BodyProgress::Eof;
        assert_eq!(progress.check_buf(&buf, false), (4, false));
        assert_eq!(progress.check_buf(&buf, true), (4, true));
    }

    #[test]
    fn chunked_reports_framing() {
        let mut buf = filled(b"3\r\nabc\r\n0\r\n\r\n");
        let mut progress =
            BodyProgress::Chunked(chunked::State::new());
        assert_eq!(progress.parse(&mut buf, 1000).unwrap(), 10);
        assert_eq!(progress.check_buf(&buf, false), (3, true));
    }
}
