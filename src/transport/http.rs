use crate::error::{Error, ErrorContext, ProviderError};
use crate::Result;
use std::env;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Default per-request timeout when neither config nor env supplies one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// How the API key travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// A vendor-specific header such as `x-api-key` or `api-key`.
    Header(&'static str),
    /// A query parameter such as `?key=<key>`.
    Query(&'static str),
}

/// Everything an adapter instance needs to reach its vendor.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub provider: &'static str,
    pub base_url: String,
    pub api_key: Option<String>,
    pub auth: AuthStyle,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

/// Thin reqwest wrapper: one pooled client per adapter instance.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    provider: &'static str,
    base_url: String,
    api_key: Option<String>,
    auth: AuthStyle,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(cfg: TransportConfig) -> Result<Self> {
        url::Url::parse(&cfg.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base URL: {}", e),
                ErrorContext::new()
                    .with_field_path("provider.base_url")
                    .with_details(cfg.base_url.clone())
                    .with_source(cfg.provider),
            )
        })?;

        let timeout = cfg.timeout.unwrap_or_else(|| {
            Duration::from_secs(
                env::var("MODELMUX_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            )
        });

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            provider: cfg.provider,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.filter(|k| !k.is_empty()),
            auth: cfg.auth,
            headers: cfg.headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// POST a JSON body to `base_url + path`.
    ///
    /// Resolves to `Error::Cancelled` as soon as `cancel` fires; connection
    /// failures are wrapped in a [`ProviderError`] so the vendor name survives.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(&url)
            .json(body)
            .header("x-modelmux-request-id", &request_id);

        if let Some(key) = &self.api_key {
            req = match self.auth {
                AuthStyle::Bearer => req.bearer_auth(key),
                AuthStyle::Header(name) => req.header(name, key),
                AuthStyle::Query(name) => req.query(&[(name, key)]),
            };
        }
        if stream {
            req = req.header("accept", "text/event-stream");
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        debug!(
            provider = self.provider,
            path,
            stream,
            request_id = request_id.as_str(),
            "sending request"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = req.send() => res.map_err(|e| {
                Error::Provider(
                    ProviderError::new(self.provider, "request failed")
                        .with_source(TransportError::Http(e)),
                )
            }),
        }
    }

    /// Read a whole response body, honouring cancellation.
    pub async fn read_text(
        &self,
        resp: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = resp.text() => res.map_err(|e| {
                Error::Provider(
                    ProviderError::new(self.provider, "failed to read response")
                        .with_source(TransportError::Http(e)),
                )
            }),
        }
    }
}

/// First non-empty value among the given environment variables.
pub fn api_key_from_env(vars: &[&str]) -> Option<String> {
    vars.iter()
        .filter_map(|v| env::var(v).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection-level failure (refused, reset, timed out) as opposed to a
    /// protocol-level one.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect(),
            TransportError::Other(_) => false,
        }
    }
}
