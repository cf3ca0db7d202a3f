use std::path::PathBuf;
use std::time::Duration;

/// Retry policy for connecting a session bridge to its leased node.
///
/// A freshly powered-on node may take a while before its execution host
/// accepts connections, so the bridge keeps trying:
///
/// - Connection refused: the host is not listening yet; wait
///   `reconnect_interval` before the next attempt.
/// - Timeout, unreachable host or network, DNS failure: wait `transient_pause`.
/// - Any other I/O error is fatal to the session.
///
/// Retries stop once `deadline` has elapsed since the first attempt, and the
/// client is told the node is unreachable. `deadline: None` retries forever.
#[derive(Debug, Clone)]
pub struct ConnectRetryConfig {
    /// Pause after a refused connection
    ///
    /// Default: 1s
    pub reconnect_interval: Duration,
    /// Pause after a transient network error
    ///
    /// Default: 500ms
    pub transient_pause: Duration,
    /// Timeout for a single connect attempt
    ///
    /// Default: 2s
    pub attempt_timeout: Duration,
    /// Total time budget for reaching the node
    ///
    /// Default: 60s
    pub deadline: Option<Duration>,
}

impl Default for ConnectRetryConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(1),
            transient_pause: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(60)),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the client-facing listener binds to
    pub bind: String,
    /// How bridges reach their leased node
    pub retry: ConnectRetryConfig,
    /// Optional file receiving one line per completed computation
    pub execution_log: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4322".to_string(),
            retry: ConnectRetryConfig::default(),
            execution_log: None,
        }
    }
}

impl GatewayConfig {
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_retry(mut self, retry: ConnectRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_execution_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.execution_log = Some(path.into());
        self
    }
}
