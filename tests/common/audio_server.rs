//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves fixed bodies by path, one request per connection. Any path
//! without a route gets a 404. The request method is ignored.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Route {
    pub fn html(path: &str, body: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            status: "200 OK",
            content_type: "text/html; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    pub fn json(path: &str, body: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            status: "200 OK",
            content_type: "application/json",
            body: body.into().into_bytes(),
        }
    }

    pub fn audio(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            status: "200 OK",
            content_type: "audio/mpeg",
            body,
        }
    }
}

pub struct AudioServer {
    listener: TcpListener,
    base_url: String,
}

impl AudioServer {
    /// Binds an ephemeral port so pages can embed the base URL before serving.
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            base_url: format!("http://127.0.0.1:{}/", port),
        }
    }

    /// Base URL with a trailing slash, e.g. "http://127.0.0.1:12345/".
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Starts serving in a background thread until the process exits.
    pub fn serve(self, routes: Vec<Route>) {
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(routes.into_iter().map(|r| (r.path.clone(), r)).collect());
        thread::spawn(move || {
            for stream in self.listener.incoming().flatten() {
                let routes = Arc::clone(&routes);
                thread::spawn(move || handle(stream, &routes));
            }
        });
    }
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let Some(raw) = read_request(&mut stream) else { return };
    let request = String::from_utf8_lossy(&raw);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(|target| target.split('?').next().unwrap_or(target))
        .unwrap_or("/");

    let (status, content_type, body): (&str, &str, &[u8]) = match routes.get(path) {
        Some(route) => (route.status, route.content_type, &route.body),
        None => ("404 Not Found", "text/plain", b"not found"),
    };
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

/// Reads the head and, when a Content-Length is given, the whole body so the
/// socket is drained before the response goes out.
fn read_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return if data.is_empty() { None } else { Some(data) };
        }
        data.extend_from_slice(&buf[..n]);

        let Some(head_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..head_end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= head_end + 4 + body_len {
            return Some(data);
        }
    }
}
