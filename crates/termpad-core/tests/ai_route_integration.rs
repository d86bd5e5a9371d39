use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use termpad_core::ai::{
    RemoteRoute, StreamOutcome, SuggestionCoordinator, SuggestionKind, SuggestionRequest,
};

/// Serves exactly one HTTP request with `response` and hands back the request
/// body it received.
fn serve_once(response: &'static str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let url = format!("http://{}/suggest", listener.local_addr().expect("local addr"));
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().expect("content length");
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("read body");
        let _ = tx.send(String::from_utf8_lossy(&body).into_owned());

        let mut stream = stream;
        stream.write_all(response.as_bytes()).expect("write response");
        stream.flush().expect("flush");
    });

    (url, rx)
}

fn request() -> SuggestionRequest {
    SuggestionRequest {
        content: "let x = ".to_string(),
        line: 0,
        col: 8,
        line_text: "let x = ".to_string(),
        language: "rust".to_string(),
        file_name: "lib.rs".to_string(),
        prefix: "let x = ".to_string(),
        suffix: String::new(),
        kind: SuggestionKind::Completion,
    }
}

#[test]
fn server_error_resolves_to_no_suggestion() {
    let (url, _body) = serve_once(
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom",
    );
    let coordinator = SuggestionCoordinator::new();
    coordinator.set_route(RemoteRoute::new(url));

    assert_eq!(coordinator.get_suggestion(&request()), None);
}

#[test]
fn plain_route_posts_request_and_reads_text() {
    let (url, body) = serve_once(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 14\r\nConnection: close\r\n\r\n{\"text\":\"42;\"}",
    );
    let coordinator = SuggestionCoordinator::new();
    coordinator.set_route(RemoteRoute::new(url));
    assert!(!coordinator.is_streaming_available());

    assert_eq!(coordinator.get_suggestion(&request()).as_deref(), Some("42;"));

    let sent: serde_json::Value =
        serde_json::from_str(&body.recv().expect("request body")).expect("json body");
    assert_eq!(sent["type"], "completion");
    assert_eq!(sent["fileName"], "lib.rs");
    assert_eq!(sent["col"], 8);
}

#[test]
fn streaming_route_forwards_frames_until_done() {
    let (url, _body) = serve_once(concat!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
        "data: {\"text\":\"vec\"}\n\n",
        ": heartbeat\n\n",
        "data: {\"text\":\"![]\"}\n\n",
        "data: [DONE]\n\n",
        "data: {\"text\":\"ignored\"}\n\n",
    ));
    let coordinator = SuggestionCoordinator::new();
    coordinator.set_route(RemoteRoute::new(url).streaming(true));
    assert!(coordinator.is_streaming_available());

    let mut chunks = Vec::new();
    let mut completed = false;
    let outcome = coordinator.stream_suggestion(
        &request(),
        |chunk| chunks.push(chunk.to_string()),
        || completed = true,
    );

    assert_eq!(outcome, StreamOutcome::Completed);
    assert_eq!(chunks, vec!["vec".to_string(), "![]".to_string()]);
    assert!(completed);
}

#[test]
fn streaming_against_failing_route_still_completes() {
    let (url, _body) =
        serve_once("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    let coordinator = SuggestionCoordinator::new();
    coordinator.set_route(RemoteRoute::new(url).streaming(true));

    let mut chunks = Vec::new();
    let mut completed = false;
    let outcome = coordinator.stream_suggestion(
        &request(),
        |chunk| chunks.push(chunk.to_string()),
        || completed = true,
    );

    assert_eq!(outcome, StreamOutcome::Failed);
    assert!(chunks.is_empty());
    assert!(completed);
}
