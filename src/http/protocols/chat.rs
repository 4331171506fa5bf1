/// Single-stage chat completion protocol: one endpoint, OpenAI-style
/// request body, SSE response stream.
use std::time::Instant;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RequestError};
use crate::http::client::{
    build_http_client, map_send_error, ClientConfig, ProtocolClient, StreamStats,
};
use crate::trace::RequestDescriptor;

pub struct ChatClient {
    client: Client,
    config: ClientConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u64,
    stream: bool,
    /// Benchmark extension honored by vLLM-style servers: generate the
    /// full `max_tokens` regardless of EOS so output length is exact.
    ignore_eos: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Delta,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let client = build_http_client(&config)?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl ProtocolClient for ChatClient {
    async fn execute(&self, request: &RequestDescriptor) -> Result<StreamStats, RequestError> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.output_tokens,
            stream: true,
            ignore_eos: true,
        };

        let started = Instant::now();
        let mut req = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| map_send_error(e, self.config.stall_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RequestError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut events = response.bytes_stream().eventsource();
        let mut first_token_offset = None;
        let mut tokens_emitted = 0u64;

        loop {
            let next = tokio::time::timeout(self.config.stall_timeout, events.next())
                .await
                .map_err(|_| RequestError::Timeout(self.config.stall_timeout))?;
            let Some(event) = next else { break };
            let event = event.map_err(|e| RequestError::Stream(e.to_string()))?;

            if event.data == "[DONE]" {
                break;
            }

            let chunk: ChatChunk = serde_json::from_str(&event.data)
                .map_err(|e| RequestError::Stream(format!("bad chunk: {e}")))?;
            if let Some(choice) = chunk.choices.first() {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() {
                        tokens_emitted += 1;
                        if first_token_offset.is_none() {
                            first_token_offset = Some(started.elapsed());
                        }
                    }
                }
            }
        }

        Ok(StreamStats {
            first_token_offset,
            total_duration: started.elapsed(),
            tokens_emitted,
        })
    }

    fn name(&self) -> &'static str {
        "chat"
    }
}
