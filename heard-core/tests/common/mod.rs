//! Shared fixtures for integration tests: a canned-response HTTP server,
//! scripted speech sessions, and synthetic audio feeds.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use heard_core::audio::{AudioFeed, AudioProducer, Producer};
use heard_core::error::Result;
use heard_core::speech::events::{
    RecognitionAlternative, RecognitionResult, SpeechEvent, TranslationResult,
};
use heard_core::speech::{SessionConfig, SpeechSession};

// ---------------------------------------------------------------------------
// Canned-response HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// What the server should do with one request.
pub enum CannedResponse {
    /// `200 OK` with a JSON body.
    Json(String),
    /// `200 OK` streaming newline-delimited JSON, one line per write,
    /// with `delay` between lines. The body is EOF-terminated.
    Ndjson { lines: Vec<String>, delay: Duration },
    /// An empty response with the given status code.
    Status(u16),
    /// Accept the request and never respond.
    Hang,
}

pub struct TestServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Bind an ephemeral port and serve `router` until dropped. Each
    /// connection is handled on its own task so a hanging response does
    /// not block later requests.
    pub async fn spawn<F>(router: F) -> Self
    where
        F: Fn(&RecordedRequest) -> CannedResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let router = Arc::new(router);

        let accept_requests = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let requests = Arc::clone(&accept_requests);
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    handle_connection(socket, requests, router).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection<F>(
    mut socket: TcpStream,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    router: Arc<F>,
) where
    F: Fn(&RecordedRequest) -> CannedResponse + Send + Sync + 'static,
{
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let response = router(&request);
    requests.lock().push(request);

    match response {
        CannedResponse::Json(body) => {
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
        }
        CannedResponse::Ndjson { lines, delay } => {
            let head = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n";
            let _ = socket.write_all(head.as_bytes()).await;
            for line in lines {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = socket.write_all(line.as_bytes()).await;
                let _ = socket.write_all(b"\n").await;
                let _ = socket.flush().await;
            }
            // Dropping the socket terminates the EOF-delimited body.
        }
        CannedResponse::Status(code) => {
            let head = format!(
                "HTTP/1.1 {code} ERR\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            let _ = socket.write_all(head.as_bytes()).await;
        }
        CannedResponse::Hang => {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some(RecordedRequest { method, path, body })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Scripted speech session
// ---------------------------------------------------------------------------

/// Emits a fixed script of events as soon as the session starts and
/// records every interaction for assertions.
pub struct ScriptedSpeechSession {
    script: Vec<SpeechEvent>,
    pub started: Arc<AtomicUsize>,
    pub stopped: Arc<AtomicUsize>,
    pub audio_bytes: Arc<AtomicUsize>,
    pub last_config: Arc<Mutex<Option<SessionConfig>>>,
    events_tx: Option<mpsc::UnboundedSender<SpeechEvent>>,
}

impl ScriptedSpeechSession {
    pub fn new(script: Vec<SpeechEvent>) -> Self {
        Self {
            script,
            started: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
            audio_bytes: Arc::new(AtomicUsize::new(0)),
            last_config: Arc::new(Mutex::new(None)),
            events_tx: None,
        }
    }
}

impl SpeechSession for ScriptedSpeechSession {
    fn start(
        &mut self,
        _token: &str,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<SpeechEvent>,
    ) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock() = Some(config.clone());
        for event in &self.script {
            let _ = events.send(event.clone());
        }
        self.events_tx = Some(events);
        Ok(())
    }

    fn send_audio(&mut self, pcm: &[u8]) -> Result<()> {
        self.audio_bytes.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender closes the event channel, ending the drain.
        self.events_tx = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audio feeds
// ---------------------------------------------------------------------------

/// Reports ready at the given rate and produces no samples.
pub struct SilentFeed {
    pub rate: u32,
}

impl AudioFeed for SilentFeed {
    fn run(
        &mut self,
        _producer: AudioProducer,
        running: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<u32>>,
    ) {
        let _ = ready.send(Ok(self.rate));
        while running.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Pushes a steady trickle of samples so audio forwarding can be observed.
pub struct ToneFeed {
    pub rate: u32,
}

impl AudioFeed for ToneFeed {
    fn run(
        &mut self,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<u32>>,
    ) {
        let _ = ready.send(Ok(self.rate));
        let block = vec![0.1f32; 160];
        while running.load(Ordering::Relaxed) {
            producer.push_slice(&block);
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Reports an open failure without producing samples.
pub struct BrokenFeed;

impl AudioFeed for BrokenFeed {
    fn run(
        &mut self,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<u32>>,
    ) {
        let _ = ready.send(Err(heard_core::HeardError::AudioDevice(
            "device unplugged".into(),
        )));
    }
}

// ---------------------------------------------------------------------------
// Event builders and channel helpers
// ---------------------------------------------------------------------------

pub fn transcript_event(pairs: &[(&str, &str)]) -> SpeechEvent {
    SpeechEvent::AddTranscript {
        results: pairs
            .iter()
            .map(|(speaker, content)| RecognitionResult {
                alternatives: vec![RecognitionAlternative {
                    content: content.to_string(),
                    speaker: Some(speaker.to_string()),
                }],
            })
            .collect(),
    }
}

pub fn translation_event(speaker: &str, content: &str) -> SpeechEvent {
    SpeechEvent::AddTranslation {
        results: vec![TranslationResult {
            content: content.to_string(),
            speaker: Some(speaker.to_string()),
        }],
    }
}

/// Receive one broadcast value, skipping lag notifications, within 2 s.
pub async fn recv_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(value) => return value,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("broadcast channel closed unexpectedly")
                }
            }
        }
    })
    .await
    .expect("timed out waiting for broadcast event")
}

/// Poll `probe` every 10 ms until it returns true or 3 s elapse.
pub async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..300 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}
