//! Minimal HTTP/1.1 origin used by the transfer tests.
//!
//! Serves one in-memory file, answers HEAD and ranged GET requests, and can be told to
//! misbehave for specific ranges (keyed by the range start).

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Number of failures to inject for a range; `ALWAYS` never recovers.
pub const ALWAYS: usize = usize::MAX;

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Status for HEAD requests instead of 200.
    pub head_status: Option<u16>,
    pub omit_content_length: bool,
    /// Advertise `Accept-Ranges: none` and answer every GET with the whole file.
    pub refuse_ranges: bool,
    /// Advertise ranges but answer every GET with the whole file.
    pub ignore_range: bool,
    /// Range start -> number of 500 responses before serving normally.
    pub failing: HashMap<u64, usize>,
    /// Range start -> number of responses that end after half of the body.
    pub short: HashMap<u64, usize>,
    /// Range start -> pause between 16 byte pieces of the body.
    pub slow: HashMap<u64, Duration>,
}

struct State {
    body: Vec<u8>,
    behavior: Mutex<Behavior>,
    hits: Mutex<HashMap<u64, usize>>,
    head_hits: Mutex<usize>,
}

pub struct TestServer {
    pub base_url: String,
    state: Arc<State>,
}

impl TestServer {
    pub async fn start(body: Vec<u8>, behavior: Behavior) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            body,
            behavior: Mutex::new(behavior),
            hits: Mutex::new(HashMap::new()),
            head_hits: Mutex::new(0),
        });

        let server_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = server_state.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, state).await;
                });
            }
        });

        TestServer {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/media/video.mp4", self.base_url)
    }

    /// GET requests received for the range starting at `start`.
    pub fn hits(&self, start: u64) -> usize {
        *self.state.hits.lock().unwrap().get(&start).unwrap_or(&0)
    }

    /// HEAD requests received.
    pub fn head_hits(&self) -> usize {
        *self.state.head_hits.lock().unwrap()
    }
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7919) % 251) as u8).collect()
}

/// File names in `dir`, sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

async fn handle(mut stream: TcpStream, state: Arc<State>) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let text = String::from_utf8_lossy(&request).to_string();
    let mut lines = text.split("\r\n");
    let method = lines
        .next()
        .and_then(|l| l.split(' ').next())
        .unwrap_or_default()
        .to_string();
    let range = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("range") {
            return None;
        }
        let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
        Some((start.parse::<u64>().ok()?, end.parse::<u64>().ok()?))
    });

    let behavior = state.behavior.lock().unwrap().clone();
    let total = state.body.len() as u64;

    if method == "HEAD" {
        *state.head_hits.lock().unwrap() += 1;
        let head = match behavior.head_status {
            Some(status) => format!(
                "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            ),
            None => {
                let mut head = String::from("HTTP/1.1 200 OK\r\n");
                if !behavior.omit_content_length {
                    head.push_str(&format!("Content-Length: {}\r\n", total));
                }
                let ranges = if behavior.refuse_ranges { "none" } else { "bytes" };
                head.push_str(&format!(
                    "Accept-Ranges: {}\r\nContent-Type: video/mp4\r\nConnection: close\r\n\r\n",
                    ranges
                ));
                head
            }
        };
        stream.write_all(head.as_bytes()).await?;
        return stream.shutdown().await;
    }

    let (start, end) = match range {
        Some((start, end)) if !behavior.refuse_ranges && !behavior.ignore_range => {
            (start, end.min(total.saturating_sub(1)))
        }
        _ => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                total
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&state.body).await?;
            return stream.shutdown().await;
        }
    };
    *state.hits.lock().unwrap().entry(start).or_insert(0) += 1;

    if take_failure(&state, start, |b| &mut b.failing) {
        stream
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
        return stream.shutdown().await;
    }

    let slice = &state.body[start as usize..=end as usize];
    let slice = if take_failure(&state, start, |b| &mut b.short) {
        &slice[..slice.len() / 2]
    } else {
        slice
    };

    let head = format!(
        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        start,
        end,
        total,
        slice.len()
    );
    stream.write_all(head.as_bytes()).await?;

    match behavior.slow.get(&start) {
        Some(pause) => {
            for piece in slice.chunks(16) {
                stream.write_all(piece).await?;
                stream.flush().await?;
                tokio::time::sleep(*pause).await;
            }
        }
        None => stream.write_all(slice).await?,
    }
    stream.shutdown().await
}

/// Consumes one injected failure for `start` from the map selected by `pick`.
fn take_failure<F>(state: &State, start: u64, pick: F) -> bool
where
    F: Fn(&mut Behavior) -> &mut HashMap<u64, usize>,
{
    let mut behavior = state.behavior.lock().unwrap();
    let map = pick(&mut *behavior);
    match map.get_mut(&start) {
        Some(remaining) if *remaining == ALWAYS => true,
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}
