//! Test doubles shared by the integration suites.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use toggle_fetcher::{HttpToggleFetcher, HttpToggleFetcherBuilder, ToggleFetcherConfig};

/// One canned HTTP/1.1 response.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    status: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    body_delay: Option<Duration>,
}

impl ScriptedResponse {
    pub fn status(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
            body_delay: None,
        }
    }

    pub fn ok_json(body: &str) -> Self {
        Self::status(200, "OK")
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self
    }

    /// Send the head right away but hold the body back
    pub fn stall_body(mut self, delay: Duration) -> Self {
        self.body_delay = Some(delay);
        self
    }

    fn head(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}\r\n"))
            .collect();
        format!(
            "HTTP/1.1 {} {}\r\n{headers}content-length: {}\r\nconnection: close\r\n\r\n",
            self.status,
            self.reason,
            self.body.len()
        )
    }
}

/// Raw TCP server answering requests from a fixed script and recording
/// each request head verbatim.
///
/// Once the script runs out every request gets a 500.
pub struct ScriptedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let recorded = Arc::clone(&recorded);
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    serve_one(stream, recorded, script).await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Request heads received so far, oldest first
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    recorded: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    recorded
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&buf).into_owned());

    let response = script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| ScriptedResponse::status(500, "Script Exhausted"));

    if stream.write_all(response.head().as_bytes()).await.is_err() {
        return;
    }
    if let Some(delay) = response.body_delay {
        let _ = stream.flush().await;
        tokio::time::sleep(delay).await;
    }
    let _ = stream.write_all(&response.body).await;
    let _ = stream.shutdown().await;
}

/// Header lines of a recorded request head as lowercase `(name, value)`
/// pairs, in wire order
pub fn header_lines(request: &str) -> Vec<(String, String)> {
    request
        .split("\r\n")
        .skip(1)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect()
}

/// Configuration pointing at a local server
pub fn test_config(api_url: &str) -> ToggleFetcherConfig {
    ToggleFetcherConfig {
        instance_id: "billing-7f9c".to_owned(),
        call_timeout: Duration::from_secs(2),
        ..ToggleFetcherConfig::new(api_url, "billing")
    }
}

pub fn fetcher_builder(api_url: &str) -> HttpToggleFetcherBuilder {
    HttpToggleFetcher::builder(test_config(api_url))
}

pub fn fetcher(api_url: &str) -> HttpToggleFetcher {
    fetcher_builder(api_url).build().unwrap()
}

pub const TOGGLES: &str = r#"{
    "version": 2,
    "features": [
        {
            "name": "checkout.new-flow",
            "enabled": true,
            "strategies": [{ "name": "default", "parameters": {} }]
        },
        { "name": "search.v2", "enabled": false }
    ]
}"#;

/// Address nothing is listening on
pub fn closed_port_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Collects the messages of WARN events
#[derive(Clone, Default)]
pub struct WarningCapture {
    warnings: Arc<Mutex<Vec<String>>>,
}

impl WarningCapture {
    /// Install on the current thread until the guard drops
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        use tracing_subscriber::layer::SubscriberExt;

        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.warnings.lock().unwrap().push(visitor.0);
        }
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}
