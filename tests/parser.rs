extern crate env_logger;
extern crate tk_h1_client;

mod support;

use tk_h1_client::Request;
use tk_h1_client::channel::Direction;
use tk_h1_client::client::{Config, Error, RecvMode};

use support::{mock_conn, get_request, init_logging, Event, Recorder};


fn exchange(request: Request, mode: RecvMode, response: &[u8],
    byte_by_byte: bool)
    -> Vec<Event>
{
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, _state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::new(mode);
    let stream = handle.make_request(request, Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    if byte_by_byte {
        for &byte in response {
            conn.data_received(&[byte]);
        }
    } else {
        conn.data_received(response);
    }
    let result = events.lock().unwrap().clone();
    result
}

fn buffered_exchange(response: &[u8]) -> Vec<Event> {
    exchange(get_request("/"), RecvMode::Buffered(1 << 20),
        response, false)
}

#[test]
fn no_content() {
    let events = buffered_exchange(
        b"HTTP/1.1 204 No Content\r\n\r\n");
    assert_eq!(events, vec![
        Event::Headers(204, false, vec![]),
        Event::Data(vec![], true),
        Event::Done(Ok(())),
    ]);
}

#[test]
fn fixed_body() {
    let events = buffered_exchange(
        b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nCall Momo");
    assert_eq!(events, vec![
        Event::Headers(200, false, vec![
            ("Content-Length".to_string(), b"9".to_vec())]),
        Event::Data(b"Call Momo".to_vec(), true),
        Event::Done(Ok(())),
    ]);
}

#[test]
fn informational_before_final() {
    let events = buffered_exchange(
        b"HTTP/1.1 100 Continue\r\n\
          Date: Mon, 27 Jul 2009 12:28:53 GMT\r\n\
          \r\n\
          HTTP/1.1 200 OK\r\n\
          Content-Length: 9\r\n\
          \r\n\
          Call Momo");
    assert_eq!(events[0], Event::Info(100));
    assert_eq!(events[1], Event::Headers(200, false, vec![
        ("Content-Length".to_string(), b"9".to_vec())]));
    assert_eq!(events[2], Event::Data(b"Call Momo".to_vec(), true));
    assert_eq!(events[3], Event::Done(Ok(())));
}

#[test]
fn chunked_with_extensions_and_trailers() {
    let events = buffered_exchange(
        b"HTTP/1.1 200 OK\r\n\
          Transfer-Encoding: chunked\r\n\
          \r\n\
          3;x=y\r\nabc\r\n\
          10\r\nwrite more tests\r\n\
          0\r\nX-Checksum: 1\r\n\r\n");
    assert_eq!(events, vec![
        Event::Headers(200, false, vec![
            ("Transfer-Encoding".to_string(), b"chunked".to_vec())]),
        Event::Extensions(b";x=y".to_vec()),
        Event::Data(b"abcwrite more tests".to_vec(), true),
        Event::Done(Ok(())),
    ]);
}

#[test]
fn byte_by_byte_equals_all_at_once() {
    let response: &[u8] =
        b"HTTP/1.1 100 Continue\r\n\r\n\
          HTTP/1.1 200 OK\r\n\
          Transfer-Encoding: chunked\r\n\
          \r\n\
          3;x=y\r\nabc\r\n\
          10\r\nwrite more tests\r\n\
          0\r\nX-Checksum: 1\r\n\r\n";
    let blob = exchange(get_request("/"),
        RecvMode::Buffered(1 << 20), response, false);
    let trickled = exchange(get_request("/"),
        RecvMode::Buffered(1 << 20), response, true);
    assert_eq!(blob, trickled);
}

#[test]
fn head_has_no_body() {
    let events = exchange(Request::new("HEAD", "/"),
        RecvMode::Buffered(1 << 20),
        b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n", false);
    assert_eq!(events, vec![
        Event::Headers(200, false, vec![
            ("Content-Length".to_string(), b"500".to_vec())]),
        Event::Data(vec![], true),
        Event::Done(Ok(())),
    ]);
}

#[test]
fn progressive_delivery() {
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, _state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::new(RecvMode::Progressive);
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    conn.data_received(
        b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello");
    conn.data_received(b"world");
    let events = events.lock().unwrap().clone();
    assert_eq!(events[1], Event::Data(b"hello".to_vec(), false));
    assert_eq!(events[2], Event::Data(b"world".to_vec(), true));
    assert_eq!(events[3], Event::Done(Ok(())));
}

#[test]
fn eof_delimited_body() {
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::buffered();
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    conn.data_received(b"HTTP/1.1 200 OK\r\n\r\nhello");
    assert!(events.lock().unwrap().iter()
        .all(|e| !matches!(*e, Event::Done(..))));
    conn.shutdown_received(Direction::Read, Ok(()));
    let events = events.lock().unwrap().clone();
    assert_eq!(events[1], Event::Data(b"hello".to_vec(), true));
    assert_eq!(events[2], Event::Done(Ok(())));
    assert!(state.lock().unwrap().shutdowns.len() >= 1);
}

#[test]
fn bad_status_line() {
    let events = buffered_exchange(b"BOGUS STUFF\r\n\r\n");
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0],
        Event::Done(Err(Error::Header(..)))));
}

#[test]
fn duplicate_content_length() {
    let events = buffered_exchange(
        b"HTTP/1.1 200 OK\r\n\
          Content-Length: 4\r\n\
          Content-Length: 4\r\n\
          \r\nbody");
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0],
        Event::Done(Err(Error::DuplicateContentLength))));
}

#[test]
fn reset_reading_headers() {
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, _state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::buffered();
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    conn.data_received(b"HTTP/1.1 200 OK\r\n");
    conn.shutdown_received(Direction::Read, Ok(()));
    let events = events.lock().unwrap().clone();
    assert_eq!(events,
        vec![Event::Done(Err(Error::ResetOnHeaders))]);
}

#[test]
fn reset_reading_body() {
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, _state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::buffered();
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    conn.data_received(
        b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
    conn.shutdown_received(Direction::Read, Ok(()));
    let events = events.lock().unwrap().clone();
    assert!(matches!(events.last(),
        Some(&Event::Done(Err(Error::ResetOnBody)))));
}

#[test]
fn premature_response() {
    init_logging();
    let cfg = Config::new().done();
    // pipeline refuses buffers, so the request never starts writing
    let (mut conn, state) = mock_conn(&cfg);
    state.lock().unwrap().refuse_buffers = true;
    let handle = conn.handle();
    let (rec, events) = Recorder::buffered();
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    assert_eq!(state.lock().unwrap().wire, b"".to_vec());
    conn.data_received(b"HTTP/1.1 200 OK\r\n\r\n");
    let events = events.lock().unwrap().clone();
    assert_eq!(events,
        vec![Event::Done(Err(Error::PrematureResponse))]);
}

#[test]
fn unexpected_data_after_response() {
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::buffered();
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    conn.data_received(b"HTTP/1.1 204 No Content\r\n\r\nEXTRA");
    let events = events.lock().unwrap().clone();
    assert_eq!(events, vec![
        Event::Headers(204, false, vec![]),
        Event::Data(vec![], true),
        Event::Done(Ok(())),
    ]);
    let state = state.lock().unwrap();
    assert!(state.shutdowns.iter()
        .any(|&(_, ref r)| *r == Err(Error::UnexpectedData)));
}

#[test]
fn window_stalls_and_resumes() {
    init_logging();
    let cfg = Config::new().initial_read_window(10).done();
    let (mut conn, state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (rec, events) = Recorder::buffered();
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    let response = b"HTTP/1.1 204 No Content\r\n\r\n";
    conn.data_received(response);
    // the header block is bigger than the window, nothing happens
    assert!(events.lock().unwrap().is_empty());
    handle.update_window(100);
    conn.dispatch();
    let events = events.lock().unwrap().clone();
    assert_eq!(events[2], Event::Done(Ok(())));
    // the manual credit plus the automatic framing refund
    assert_eq!(state.lock().unwrap().refunds, 100 + response.len());
}

#[test]
fn buffered_body_too_long() {
    let events = exchange(get_request("/"), RecvMode::Buffered(4),
        b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789",
        false);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1],
        Event::Done(Err(Error::BodyTooLong))));
}

#[test]
fn callback_error_stops_stream() {
    init_logging();
    let cfg = Config::new().done();
    let (mut conn, state) = mock_conn(&cfg);
    let handle = conn.handle();
    let (mut rec, events) = Recorder::buffered();
    rec.fail_data = true;
    let stream = handle
        .make_request(get_request("/"), Box::new(rec)).unwrap();
    stream.activate().unwrap();
    conn.dispatch();
    conn.data_received(
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
    let events = events.lock().unwrap().clone();
    assert!(matches!(events.last(),
        Some(&Event::Done(Err(Error::CallbackError)))));
    assert!(state.lock().unwrap().shutdowns.iter()
        .any(|&(_, ref r)| *r == Err(Error::CallbackError)));
    assert_eq!(stream.result(), Some(Err(Error::CallbackError)));
}
