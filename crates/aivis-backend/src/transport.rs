//! How a JSON request reaches a backend and how its reply comes back.
//!
//! [`SubprocessTransport`] spawns a command per invocation and speaks one
//! JSON line over stdin/stdout. [`HttpTransport`] POSTs the same body to a
//! URL. Both enforce the caller's per-call timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::BackendError;

/// Grace period for collecting stderr from a child that exited silently.
const EXIT_REAP_TIMEOUT: Duration = Duration::from_secs(5);
/// Stderr kept in error messages.
const MAX_STDERR_CHARS: usize = 2_000;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label for logs (`subprocess` or `http`).
    fn kind(&self) -> &'static str;

    /// Send one JSON `body` and return the raw JSON reply.
    async fn exchange(&self, body: &str, timeout: Duration) -> Result<String, BackendError>;
}

/// Spawns `program args...` for every invocation.
#[derive(Debug, Clone)]
pub struct SubprocessTransport {
    program: String,
    args: Vec<String>,
}

impl SubprocessTransport {
    /// Parse a whitespace-separated command line (no shell quoting).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidRequest`] if the command line is blank.
    pub fn from_command_line(command_line: &str) -> Result<Self, BackendError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| BackendError::InvalidRequest("backend command is blank".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_STDERR_CHARS {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(MAX_STDERR_CHARS).collect();
        cut.push('…');
        cut
    }
}

async fn write_request(
    stdin: &mut tokio::process::ChildStdin,
    body: &str,
) -> std::io::Result<()> {
    stdin.write_all(body.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.shutdown().await
}

#[async_trait]
impl Transport for SubprocessTransport {
    fn kind(&self) -> &'static str {
        "subprocess"
    }

    async fn exchange(&self, body: &str, timeout: Duration) -> Result<String, BackendError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Io(std::io::Error::other("child stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Io(std::io::Error::other("child stdout not captured")))?;
        // Drained concurrently so a chatty child never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let exchange = async move {
            match write_request(&mut stdin, body).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!("backend closed stdin before reading the request");
                }
                other => other?,
            }
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if !line.trim().is_empty() {
                    return Ok::<_, std::io::Error>(Some(line));
                }
            }
            Ok(None)
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        if !matches!(outcome, Ok(Ok(None))) {
            if let Some(task) = &stderr {
                task.abort();
            }
        }

        match outcome {
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(program = %self.program, error = %e, "failed to kill timed-out backend");
                }
                Err(BackendError::Timeout(timeout))
            }
            Ok(Err(e)) => Err(BackendError::Io(e)),
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => {
                let stderr = match stderr {
                    Some(task) => tokio::time::timeout(EXIT_REAP_TIMEOUT, task)
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_default(),
                    None => String::new(),
                };
                let status = match tokio::time::timeout(EXIT_REAP_TIMEOUT, child.wait()).await {
                    Ok(Ok(status)) => status.to_string(),
                    _ => "unknown status".to_string(),
                };
                Err(BackendError::Exited {
                    status,
                    stderr: truncate(&stderr),
                })
            }
        }
    }
}

/// POSTs the JSON body to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidRequest`] if `url` does not parse, or
    /// [`BackendError::Http`] if the client cannot be constructed.
    pub fn new(url: &str) -> Result<Self, BackendError> {
        let url = Url::parse(url)
            .map_err(|e| BackendError::InvalidRequest(format!("invalid backend URL '{url}': {e}")))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent("aivis/0.1 (report-pipeline)")
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn exchange(&self, body: &str, timeout: Duration) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(timeout)
                } else {
                    BackendError::Http(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(timeout)
            } else {
                BackendError::Http(e)
            }
        })?;

        if !status.is_success() {
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        Ok(text)
    }
}
