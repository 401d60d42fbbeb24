//! Scripted provider for tests.
//!
//! Replies are consumed in order; each may carry its own latency so a test
//! can make one call fast and the next one blow its deadline. Clones share
//! the script and the call log, so a test can keep a handle after passing
//! the provider to the coordinator.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::{CallError, ProviderError, ProviderErrorKind};
use crate::llm::TextProvider;

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(CallError),
}

#[derive(Debug, Clone)]
struct Step {
    outcome: Scripted,
    delay: Duration,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    script: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn push(self, outcome: Scripted, delay: Duration) -> Self {
        locked(&self.script).push_back(Step { outcome, delay });
        self
    }

    /// Queue a successful reply.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(text.into()), Duration::ZERO)
    }

    /// Queue a successful reply that arrives after `delay`.
    pub fn with_slow_reply(self, text: impl Into<String>, delay: Duration) -> Self {
        self.push(Scripted::Reply(text.into()), delay)
    }

    /// Queue a failure.
    pub fn with_error(self, error: CallError) -> Self {
        self.push(Scripted::Fail(error), Duration::ZERO)
    }

    /// Queue a provider error with the given message, classified the way
    /// real clients classify theirs.
    pub fn with_provider_error(self, message: &str) -> Self {
        self.with_error(ProviderError::classify(message, ProviderErrorKind::Upstream).into())
    }

    /// Prompts received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }
}

#[async_trait]
impl TextProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, CallError> {
        locked(&self.calls).push(prompt.to_string());

        let step = locked(&self.script).pop_front();
        let Some(step) = step else {
            return Ok("Mock response".to_string());
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.outcome {
            Scripted::Reply(text) => Ok(text),
            Scripted::Fail(err) => Err(err),
        }
    }
}

/// One-shot HTTP responder on a loopback port, for exercising the real
/// clients without a network.
///
/// Accepts a single connection, records the raw request, and answers with
/// the given status and JSON body.
pub struct StubServer {
    pub url: String,
    request: JoinHandle<io::Result<String>>,
}

impl StubServer {
    pub async fn respond_once(status: u16, body: impl Into<String>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let body = body.into();

        let request = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let raw = read_request(&mut socket).await?;

            let response = format!(
                "HTTP/1.1 {} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await?;
            socket.shutdown().await?;
            Ok::<_, io::Error>(raw)
        });

        Ok(Self { url, request })
    }

    /// The raw request the stub received (head and body).
    pub async fn request(self) -> io::Result<String> {
        self.request.await.map_err(io::Error::other)?
    }
}

async fn read_request(socket: &mut TcpStream) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}
