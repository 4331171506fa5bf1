/// Protocol client abstraction: encode a request descriptor into a
/// backend call, decode the streamed response into timing marks.
use std::time::Duration;

use crate::error::{ConfigError, RequestError};
use crate::trace::RequestDescriptor;

/// In-stream timing observed for one successful request, measured from
/// the moment the adapter issued the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    /// Offset of the first response unit, if any unit arrived.
    pub first_token_offset: Option<Duration>,
    /// Offset of stream completion.
    pub total_duration: Duration,
    /// Response units observed on the stream.
    pub tokens_emitted: u64,
}

/// Trait for backend protocol adapters. Implementations must not assume
/// anything about completion order across concurrent requests.
#[async_trait::async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Issue one request and consume its response stream, timestamping
    /// the first unit and completion.
    async fn execute(&self, request: &RequestDescriptor) -> Result<StreamStats, RequestError>;

    /// Protocol name for logs.
    fn name(&self) -> &'static str;
}

/// Wire protocol, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolKind {
    /// Single-endpoint chat-style completion over an SSE stream.
    Chat,
    /// Disaggregated prefill/decode serving: one stream with a
    /// distinguishable first-token event and a completion event.
    Disagg,
}

impl ProtocolKind {
    pub fn build(self, config: ClientConfig) -> Result<ProtocolClientEnum, ConfigError> {
        match self {
            ProtocolKind::Chat => {
                crate::http::protocols::chat::ChatClient::new(config).map(ProtocolClientEnum::Chat)
            }
            ProtocolKind::Disagg => crate::http::protocols::disagg::DisaggClient::new(config)
                .map(ProtocolClientEnum::Disagg),
        }
    }
}

/// Enum wrapper so the dispatcher holds one concrete client value.
pub enum ProtocolClientEnum {
    Chat(crate::http::protocols::chat::ChatClient),
    Disagg(crate::http::protocols::disagg::DisaggClient),
}

#[async_trait::async_trait]
impl ProtocolClient for ProtocolClientEnum {
    async fn execute(&self, request: &RequestDescriptor) -> Result<StreamStats, RequestError> {
        match self {
            ProtocolClientEnum::Chat(client) => client.execute(request).await,
            ProtocolClientEnum::Disagg(client) => client.execute(request).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ProtocolClientEnum::Chat(client) => client.name(),
            ProtocolClientEnum::Disagg(client) => client.name(),
        }
    }
}

/// HTTP client configuration shared by all protocol adapters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL the adapter posts to.
    pub endpoint: String,
    /// Model name for chat-style bodies.
    pub model: String,
    /// Bearer token, when the backend requires one.
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    /// Maximum wait for each streamed chunk before the request is
    /// declared stuck.
    pub stall_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: String::new(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(15),
        }
    }
}

pub(crate) fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .no_proxy()
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

pub(crate) fn map_send_error(e: reqwest::Error, stall_timeout: Duration) -> RequestError {
    if e.is_timeout() {
        RequestError::Timeout(stall_timeout)
    } else {
        RequestError::Connect(e.to_string())
    }
}
