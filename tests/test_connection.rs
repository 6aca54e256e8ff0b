mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{connection, parse_responses, MockTransport};
use webstep::error::Error;
use webstep::handler::Handler;
use webstep::http::body::Body;
use webstep::http::connection::{Connection, ConnectionOptions, Status};
use webstep::http::headers::ByteRange;
use webstep::http::message::Message;
use webstep::http::parser::ParseError;
use webstep::http::version::HttpVersion;

/// Answers every request with its path as a plain-text body.
fn echo_path() -> Arc<dyn Handler> {
    Arc::new(|message: &Message, _root: &Path| -> anyhow::Result<()> {
        let path = message.request().path().to_string();
        if let Some(mut response) = message.response() {
            response.set_body(Body::from_bytes("text/plain", path));
        }
        Ok(())
    })
}

/// Freezes every message and parks it for the test to complete.
fn parking(parked: Arc<Mutex<Vec<Message>>>) -> Arc<dyn Handler> {
    Arc::new(move |message: &Message, _root: &Path| -> anyhow::Result<()> {
        message.freeze();
        parked.lock().unwrap().push(message.clone());
        Ok(())
    })
}

fn complete(message: &Message) {
    let path = message.request().path().to_string();
    message
        .response()
        .unwrap()
        .set_body(Body::from_bytes("text/plain", path));
    message.thaw();
}

fn drive<T: webstep::http::transport::Transport>(conn: &mut Connection<T>) -> Status {
    for _ in 0..1000 {
        if conn.step(Instant::now()).unwrap() == Status::Closed {
            return Status::Closed;
        }
    }
    Status::Open
}

fn bodies(conn: &Connection<MockTransport>) -> Vec<String> {
    parse_responses(&conn.transport().written, &[])
        .into_iter()
        .map(|r| String::from_utf8(r.body).unwrap())
        .collect()
}

#[test]
fn test_single_request_round_trip() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Open);

    let responses = parse_responses(&conn.transport().written, &[]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 200);
    assert_eq!(responses[0].header("Connection"), Some("keep-alive"));
    assert_eq!(responses[0].body, b"/hello");
    assert_eq!(conn.negotiated_version(), Some(HttpVersion::Http11));
}

#[test]
fn test_pipelined_responses_follow_request_order() {
    let parked = Arc::new(Mutex::new(Vec::new()));
    let mut transport = MockTransport::new();
    transport.push(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\nGET /3 HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, parking(Arc::clone(&parked)));

    conn.step(Instant::now()).unwrap();
    let messages: Vec<Message> = parked.lock().unwrap().clone();
    assert_eq!(messages.len(), 3);
    assert!(conn.transport().written.is_empty());

    complete(&messages[2]);
    conn.step(Instant::now()).unwrap();
    assert!(conn.transport().written.is_empty());

    complete(&messages[0]);
    conn.step(Instant::now()).unwrap();
    assert_eq!(bodies(&conn), vec!["/1"]);

    complete(&messages[1]);
    conn.step(Instant::now()).unwrap();
    assert_eq!(bodies(&conn), vec!["/1", "/2", "/3"]);
}

#[test]
fn test_nested_freeze_waits_for_last_thaw() {
    let parked = Arc::new(Mutex::new(Vec::new()));
    let mut transport = MockTransport::new();
    transport.push(b"GET /a HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, parking(Arc::clone(&parked)));

    conn.step(Instant::now()).unwrap();
    let message = parked.lock().unwrap()[0].clone();
    message.freeze();

    complete(&message);
    conn.step(Instant::now()).unwrap();
    assert!(conn.transport().written.is_empty());

    message.thaw();
    conn.step(Instant::now()).unwrap();
    assert_eq!(bodies(&conn), vec!["/a"]);
}

#[test]
fn test_version_mismatch_closes_connection() {
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let handler: Arc<dyn Handler> = Arc::new(move |_: &Message, _: &Path| -> anyhow::Result<()> {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    let mut transport = MockTransport::new();
    transport.push(b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.0\r\n\r\n");
    let mut conn = connection(transport, handler);

    let result = conn.step(Instant::now());

    assert!(matches!(
        result,
        Err(Error::VersionMismatch {
            negotiated: HttpVersion::Http11,
            requested: HttpVersion::Http10,
        })
    ));
    assert_eq!(*calls.lock().unwrap(), 1);

    let responses = parse_responses(&conn.transport().written, &[]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 200);
    assert_eq!(responses[0].version, "HTTP/1.1");

    assert!(conn.is_closed());
    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Closed);
}

#[test]
fn test_parse_error_still_answers_earlier_requests() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nPATCH / HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    let result = conn.step(Instant::now());

    assert!(matches!(result, Err(Error::Parse(ParseError::UnknownMethod(_)))));
    assert_eq!(bodies(&conn), vec!["/a", "/b"]);
    assert!(conn.is_closed());
}

#[test]
fn test_invalid_content_length_is_fatal() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let paths = Arc::clone(&seen);
    let handler: Arc<dyn Handler> = Arc::new(move |message: &Message, _: &Path| -> anyhow::Result<()> {
        paths.lock().unwrap().push(message.request().path().to_string());
        Ok(())
    });

    let mut transport = MockTransport::new();
    transport.push(b"POST /a HTTP/1.1\r\nContent-Length: 2x\r\n\r\nGET /smuggled HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, handler);

    let result = conn.step(Instant::now());

    assert!(matches!(
        result,
        Err(Error::Parse(ParseError::InvalidContentLength(_)))
    ));
    assert!(seen.lock().unwrap().is_empty());
    assert!(conn.transport().written.is_empty());
    assert!(conn.is_closed());
}

#[test]
fn test_repeated_content_length_is_fatal() {
    let mut transport = MockTransport::new();
    transport.push(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\nhello");
    let mut conn = connection(transport, echo_path());

    let result = conn.step(Instant::now());

    assert!(matches!(
        result,
        Err(Error::Parse(ParseError::InvalidContentLength(_)))
    ));
    assert!(conn.transport().written.is_empty());
}

#[test]
fn test_unknown_method_closes_without_response() {
    let mut transport = MockTransport::new();
    transport.push(b"PATCH / HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    let result = conn.step(Instant::now());

    assert!(matches!(result, Err(Error::Parse(ParseError::UnknownMethod(_)))));
    assert!(conn.transport().written.is_empty());
    assert!(conn.is_closed());
}

#[test]
fn test_idle_connection_times_out() {
    let mut conn = connection(MockTransport::new(), echo_path());
    let now = Instant::now();

    assert_eq!(conn.step(now).unwrap(), Status::Open);
    assert!(conn.deadline().is_some());
    assert!(!conn.expire(now));
    assert!(conn.expire(now + Duration::from_secs(7)));
    assert_eq!(conn.step(now).unwrap(), Status::Closed);
}

#[test]
fn test_stalled_partial_request_times_out() {
    let mut transport = MockTransport::new();
    transport.push(b"GET / HTTP/1.1\r\nHost: x");
    let mut conn = connection(transport, echo_path());
    let now = Instant::now();

    assert_eq!(conn.step(now).unwrap(), Status::Open);

    assert_eq!(conn.deadline(), Some(now + Duration::from_secs(6)));
    assert!(!conn.expire(now + Duration::from_secs(5)));
    assert!(conn.expire(now + Duration::from_secs(7)));
    assert_eq!(conn.step(now).unwrap(), Status::Closed);
    assert!(conn.transport().written.is_empty());
}

#[test]
fn test_completed_lines_push_the_deadline_back() {
    let mut transport = MockTransport::new();
    transport.push(b"GET / HTTP/1.1\r\n");
    transport.push_block();
    transport.push(b"Host: x\r\n");
    let mut conn = connection(transport, echo_path());
    let start = Instant::now();
    let later = start + Duration::from_secs(4);

    conn.step(start).unwrap();
    conn.step(later).unwrap();

    assert_eq!(conn.deadline(), Some(later + Duration::from_secs(6)));
    assert!(!conn.expire(start + Duration::from_secs(7)));
}

#[test]
fn test_handler_error_becomes_500() {
    let handler: Arc<dyn Handler> = Arc::new(|message: &Message, _: &Path| -> anyhow::Result<()> {
        if message.request().path() == "/fail" {
            message.freeze();
            anyhow::bail!("backend exploded");
        }
        if let Some(mut response) = message.response() {
            response.set_body(Body::from_bytes("text/plain", "fine"));
        }
        Ok(())
    });

    let mut transport = MockTransport::new();
    transport.push(b"GET /fail HTTP/1.1\r\n\r\nGET /ok HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, handler);

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Open);

    let responses = parse_responses(&conn.transport().written, &[]);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status, 500);
    assert_eq!(responses[0].reason, "Internal Server Error");
    assert_eq!(
        responses[0].header("Content-Type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(responses[1].status, 200);
    assert_eq!(responses[1].body, b"fine");
}

#[test]
fn test_http10_closes_after_response() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /x HTTP/1.0\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Closed);

    let responses = parse_responses(&conn.transport().written, &[]);
    assert_eq!(responses[0].version, "HTTP/1.0");
    assert_eq!(responses[0].header("Connection"), Some("close"));
}

#[test]
fn test_http10_keep_alive_stays_open() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /x HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Open);
    let responses = parse_responses(&conn.transport().written, &[]);
    assert_eq!(responses[0].header("Connection"), Some("keep-alive"));
}

#[test]
fn test_requests_after_close_are_ignored() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /1 HTTP/1.1\r\nConnection: close\r\n\r\nGET /2 HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Closed);
    assert_eq!(bodies(&conn), vec!["/1"]);
}

#[test]
fn test_half_close_flushes_pending_responses() {
    let parked = Arc::new(Mutex::new(Vec::new()));
    let mut transport = MockTransport::new();
    transport.push(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n");
    transport.push_eof();
    let mut conn = connection(transport, parking(Arc::clone(&parked)));

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Open);

    let messages: Vec<Message> = parked.lock().unwrap().clone();
    complete(&messages[0]);
    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Open);

    complete(&messages[1]);
    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Closed);
    assert_eq!(bodies(&conn), vec!["/1", "/2"]);
}

#[test]
fn test_eof_between_requests_closes_cleanly() {
    let mut transport = MockTransport::new();
    transport.push_eof();
    let mut conn = connection(transport, echo_path());

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Closed);
}

#[test]
fn test_eof_mid_request_is_error() {
    let mut transport = MockTransport::new();
    transport.push(b"GET / HTTP/1.1\r\nHost: x\r\n");
    transport.push_eof();
    let mut conn = connection(transport, echo_path());

    assert!(matches!(conn.step(Instant::now()), Err(Error::UnexpectedEof)));
}

#[test]
fn test_chunk_boundaries_do_not_change_requests() {
    let input: &[u8] =
        b"GET /a?b=c HTTP/1.1\r\nHost: example.com\r\nX: 1\r\n 2\r\nRange: bytes=0-9\r\n\r\n";

    for size in 1..=input.len() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let handler: Arc<dyn Handler> = Arc::new(move |message: &Message, _: &Path| -> anyhow::Result<()> {
            let request = message.request();
            record.lock().unwrap().push((
                request.uri.to_string(),
                request.header("x").map(str::to_string),
                request.ranges().to_vec(),
            ));
            Ok(())
        });

        let mut transport = MockTransport::new();
        for piece in input.chunks(size) {
            transport.push(piece);
            transport.push_block();
        }
        let mut conn = connection(transport, handler);
        drive(&mut conn);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "chunk size {size}");
        assert_eq!(seen[0].0, "http://localhost/a?b=c");
        assert_eq!(seen[0].1.as_deref(), Some("1, 2"));
        assert_eq!(seen[0].2, vec![ByteRange { begin: Some(0), end: Some(9) }]);
    }
}

#[test]
fn test_head_response_has_no_body() {
    let mut transport = MockTransport::new();
    transport.push(b"HEAD /abc HTTP/1.1\r\n\r\nGET /d HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, echo_path());

    conn.step(Instant::now()).unwrap();

    let responses = parse_responses(&conn.transport().written, &[0]);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].header("Content-Length"), Some("4"));
    assert!(responses[0].body.is_empty());
    assert_eq!(responses[1].body, b"/d");
}

#[test]
fn test_simple_request_gets_raw_body_and_close() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /plain\r\n");
    let mut conn = connection(transport, echo_path());

    assert_eq!(conn.step(Instant::now()).unwrap(), Status::Closed);
    assert_eq!(conn.transport().output(), "/plain");
}

#[test]
fn test_request_body_is_read() {
    let handler: Arc<dyn Handler> = Arc::new(|message: &Message, _: &Path| -> anyhow::Result<()> {
        let body = message.request().body.clone();
        if let Some(mut response) = message.response() {
            response.set_body(Body::from_bytes("text/plain", body));
        }
        Ok(())
    });

    let mut transport = MockTransport::chunked(
        b"POST /echo HTTP/1.1\r\nContent-Length: 7\r\n\r\nhi\r\nyouGET /next HTTP/1.1\r\n\r\n",
        5,
    );
    transport.push_block();
    let mut conn = connection(transport, handler);

    drive(&mut conn);

    let responses = parse_responses(&conn.transport().written, &[]);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].body, b"hi\r\nyou");
    assert!(responses[1].body.is_empty());
}

#[test]
fn test_request_body_over_limit() {
    let mut transport = MockTransport::new();
    transport.push(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n");
    let options = ConnectionOptions {
        max_body_length: 10,
        ..ConnectionOptions::default()
    };
    let mut conn = Connection::new(transport, echo_path(), Arc::from(Path::new(".")), options);

    assert!(matches!(
        conn.step(Instant::now()),
        Err(Error::BodyTooLarge { limit: 10 })
    ));
}

#[test]
fn test_sequence_overflow() {
    let request = b"GET / HTTP/1.1\r\n\r\n";
    let mut transport = MockTransport::new();
    for _ in 0..usize::from(u16::MAX) + 2 {
        transport.push(request);
    }
    let handler: Arc<dyn Handler> = Arc::new(|_: &Message, _: &Path| -> anyhow::Result<()> { Ok(()) });
    let mut conn = connection(transport, handler);

    assert!(matches!(conn.step(Instant::now()), Err(Error::RequestOverflow)));
}

#[test]
fn test_slow_writer_keeps_order() {
    let mut transport = MockTransport::new();
    transport.push(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n");
    transport.write_limit = Some(7);
    transport.block_writes_every = Some(2);
    let mut conn = connection(transport, echo_path());

    drive(&mut conn);

    assert_eq!(bodies(&conn), vec!["/one", "/two"]);
}

#[test]
fn test_late_thaw_after_teardown_is_harmless() {
    let parked = Arc::new(Mutex::new(Vec::new()));
    let mut transport = MockTransport::new();
    transport.push(b"GET / HTTP/1.1\r\n\r\n");
    let mut conn = connection(transport, parking(Arc::clone(&parked)));

    conn.step(Instant::now()).unwrap();
    drop(conn);

    let message = parked.lock().unwrap()[0].clone();
    complete(&message);
    assert!(!message.is_frozen());
}
