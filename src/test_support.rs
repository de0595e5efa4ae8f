//! Minimal HTTP/1.1 server and a scripted renderer for tests.
//!
//! The server answers one request per connection (`Connection: close`) from a
//! fixed route table and records what it saw, including the highest number of
//! requests it was serving at once.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::download::Cookie;
use crate::render::{PageRenderer, RenderedPage};
use crate::signals::{PageSnapshot, RawExtraction};

#[derive(Debug, Clone)]
pub struct Route {
    status: u16,
    body: Vec<u8>,
    content_type: String,
    delay: Duration,
}

impl Route {
    pub fn image(body: &[u8]) -> Self {
        Self {
            status: 200,
            body: body.to_vec(),
            content_type: "image/jpeg".into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: b"error".to_vec(),
            content_type: "text/plain".into(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_content_type(mut self, ct: &str) -> Self {
        self.content_type = ct.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

#[derive(Default)]
struct ServerState {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct TestServer {
    base: String,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start<P: Into<String>>(routes: Vec<(P, Route)>) -> Self {
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(routes.into_iter().map(|(p, r)| (p.into(), r)).collect());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move { handle(stream, &routes, &state).await });
            }
        });

        Self {
            base: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }
}

async fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>, state: &ServerState) {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 64 * 1024 {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let path = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(RecordedRequest { path: path.clone(), headers });

    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);

    let route = routes.get(&path).cloned().unwrap_or_else(|| Route::status(404));
    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        route.status,
        reason(route.status),
        route.content_type,
        route.body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&route.body).await;
    let _ = stream.shutdown().await;

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

// ── Scripted renderer ──

/// Serves canned snapshots keyed by target URL. Unknown targets fail to open.
#[derive(Default)]
pub struct ScriptedRenderer {
    pages: HashMap<String, (RawExtraction, Vec<String>)>,
    pub screenshots: Arc<Mutex<Vec<std::path::PathBuf>>>,
}

impl ScriptedRenderer {
    pub fn with_page(mut self, target: &str, extraction: RawExtraction, network: Vec<String>) -> Self {
        self.pages.insert(target.to_string(), (extraction, network));
        self
    }
}

pub struct ScriptedPage {
    snapshot: PageSnapshot,
    screenshots: Arc<Mutex<Vec<std::path::PathBuf>>>,
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    type Page = ScriptedPage;

    async fn open(&self, target: &Url) -> Result<ScriptedPage> {
        let (extraction, network) = self
            .pages
            .get(target.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("net::ERR_NAME_NOT_RESOLVED at {}", target))?;
        Ok(ScriptedPage {
            snapshot: PageSnapshot {
                target: target.clone(),
                extraction,
                network,
            },
            screenshots: Arc::clone(&self.screenshots),
        })
    }
}

#[async_trait]
impl RenderedPage for ScriptedPage {
    async fn snapshot(&mut self) -> Result<PageSnapshot> {
        Ok(self.snapshot.clone())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(vec![Cookie { name: "sid".into(), value: "1".into() }])
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"png")?;
        self.screenshots.lock().expect("screenshots lock").push(path.to_path_buf());
        Ok(())
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}
