use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// How the pipeline reaches the answer-generation and mention-detection
/// backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTransport {
    /// Spawn `answer_backend` / `detect_backend` as a command per invocation
    /// and exchange one JSON line over stdin/stdout.
    Subprocess,
    /// POST the JSON request to `answer_backend` / `detect_backend` as URLs.
    Http,
}

impl std::fmt::Display for BackendTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendTransport::Subprocess => write!(f, "subprocess"),
            BackendTransport::Http => write!(f, "http"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub pricing_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Model ids every active question is sent to, in configured order.
    pub models: Vec<String>,
    pub web_search_enabled: bool,
    pub answer_max_tokens: u32,
    pub backend_transport: BackendTransport,
    /// Command line (subprocess) or URL (http) of the answer backend.
    pub answer_backend: String,
    /// Command line (subprocess) or URL (http) of the detection backend.
    pub detect_backend: String,
    /// Model used to price detection calls when the backend does not name one.
    pub detect_model: String,
    pub answer_timeout_secs: u64,
    pub web_search_timeout_secs: u64,
    pub detect_timeout_secs: u64,
    pub backend_max_retries: u32,
    pub backend_retry_backoff_base_ms: u64,
    pub run_max_concurrent_calls: usize,
    pub stage_timeout_secs: u64,
    pub tag_position_attributes: bool,
    pub worker_enabled: bool,
    pub worker_max_concurrent_runs: usize,
    pub worker_poll_interval_ms: u64,
    pub job_max_attempts: i32,
    pub job_retry_backoff_base_secs: u64,
    pub job_lock_timeout_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("pricing_path", &self.pricing_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("models", &self.models)
            .field("web_search_enabled", &self.web_search_enabled)
            .field("answer_max_tokens", &self.answer_max_tokens)
            .field("backend_transport", &self.backend_transport)
            // Backend URLs may embed credentials in userinfo or query strings.
            .field("answer_backend", &"[redacted]")
            .field("detect_backend", &"[redacted]")
            .field("detect_model", &self.detect_model)
            .field("answer_timeout_secs", &self.answer_timeout_secs)
            .field("web_search_timeout_secs", &self.web_search_timeout_secs)
            .field("detect_timeout_secs", &self.detect_timeout_secs)
            .field("backend_max_retries", &self.backend_max_retries)
            .field(
                "backend_retry_backoff_base_ms",
                &self.backend_retry_backoff_base_ms,
            )
            .field("run_max_concurrent_calls", &self.run_max_concurrent_calls)
            .field("stage_timeout_secs", &self.stage_timeout_secs)
            .field("tag_position_attributes", &self.tag_position_attributes)
            .field("worker_enabled", &self.worker_enabled)
            .field(
                "worker_max_concurrent_runs",
                &self.worker_max_concurrent_runs,
            )
            .field("worker_poll_interval_ms", &self.worker_poll_interval_ms)
            .field("job_max_attempts", &self.job_max_attempts)
            .field(
                "job_retry_backoff_base_secs",
                &self.job_retry_backoff_base_secs,
            )
            .field("job_lock_timeout_secs", &self.job_lock_timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Per-call timeout for answer generation, longer when web search is on.
    #[must_use]
    pub fn answer_timeout(&self, web_search: bool) -> std::time::Duration {
        let secs = if web_search {
            self.web_search_timeout_secs
        } else {
            self.answer_timeout_secs
        };
        std::time::Duration::from_secs(secs)
    }
}
