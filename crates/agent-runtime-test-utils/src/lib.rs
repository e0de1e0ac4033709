use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

#[derive(Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// A canned reply for one request served by [`spawn_scripted_server`].
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status_line: &str, body: &str) -> Self {
        Self {
            status_line: status_line.to_string(),
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Spawn a one-shot HTTP mock server that accepts a single request, captures it,
/// and responds with the given status line and body. Returns the base URL and a
/// receiver that yields the captured request.
pub fn spawn_one_shot_server(
    status_line: &str,
    response_body: &str,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    spawn_scripted_server(vec![MockResponse::new(status_line, response_body)])
}

/// Like [`spawn_one_shot_server`] but serves one connection per scripted
/// response, in order. Every response closes its connection, so each client
/// request lands on a fresh accept. Once the script runs out the listener is
/// dropped and further connections are refused.
pub fn spawn_scripted_server(
    responses: Vec<MockResponse>,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for response in responses {
            let (mut stream, _) = listener.accept().expect("accept mock request");
            let req = read_request(&stream);
            if tx.send(req).is_err() {
                return;
            }
            write_response(&mut stream, &response);
        }
    });

    (format!("http://{addr}"), rx)
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) {
    let mut head = format!(
        "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
        response.status_line,
        response.body.len(),
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream
        .write_all(head.as_bytes())
        .and_then(|()| stream.write_all(response.body.as_bytes()))
        .expect("write mock response");
}

fn read_request(stream: &TcpStream) -> CapturedRequest {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .expect("read request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().expect("method").to_string();
    let path = parts.next().expect("path").to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).expect("read header line") == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("read request body");

    CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8(body).expect("utf8 body"),
    }
}
