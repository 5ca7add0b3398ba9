// support: Scripted HTTP backend for wake-call tests.
//
// Binds 127.0.0.1:0 and answers each request with the next status code from
// the script, repeating the final entry once the script runs out. Every
// request is recorded with the headers the pinger is expected to send, so
// each test can spin up its own isolated backend instance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use mqtt_pinger::config::{self, PingerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub user_agent: Option<String>,
    pub cache_control: Option<String>,
    pub wake_token: Option<String>,
}

pub struct MockBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Handle to the background accept loop; dropped with the backend.
    _task: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    /// Start the backend, binding to a random available port.
    pub async fn start(script: Vec<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend local_addr");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            let mut script = script.into_iter();
            let mut status = 200u16;
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                status = script.next().unwrap_or(status);
                // record before responding so a caller that has seen the
                // response also sees the request in `requests()`
                if let Some(request) = read_request(&mut stream).await {
                    recorded.lock().await.push(request);
                }
                write_response(&mut stream, status).await;
            }
        });

        MockBackend {
            addr,
            requests,
            _task: task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn hits(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Poll until the backend has seen `count` requests, or panic after ~2s.
    pub async fn wait_for_hits(&self, count: usize) {
        for _ in 0..100 {
            if self.hits().await >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!(
            "mock backend saw {} requests, expected {}",
            self.hits().await,
            count
        );
    }
}

/// Read one HTTP/1.1 request up to the end of its headers.
async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.lines();
    let request_line = lines.next()?;
    let path = request_line.split_whitespace().nth(1)?.to_owned();

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    Some(RecordedRequest {
        path,
        user_agent: headers.remove("user-agent"),
        cache_control: headers.remove("cache-control"),
        wake_token: headers.remove("x-wake-token"),
    })
}

/// Write a bodyless response and close the connection.
async fn write_response(stream: &mut TcpStream, status: u16) {
    let reason = match status {
        200 => "OK",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Mock",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        status, reason
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Build a pinger config through the normal loader, with test overrides.
pub fn test_config(pairs: &[(&str, &str)]) -> PingerConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    config::load_from(move |key| map.get(key).cloned()).expect("test config")
}

/// The fixed headers every wake call must carry.
pub fn assert_standard_headers(request: &RecordedRequest) {
    assert!(
        request
            .user_agent
            .as_deref()
            .unwrap_or_default()
            .starts_with("mqtt-pinger/"),
        "unexpected User-Agent: {:?}",
        request.user_agent
    );
    assert_eq!(request.cache_control.as_deref(), Some("no-cache"));
}
