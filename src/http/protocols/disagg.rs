/// Disaggregated prefill/decode serving protocol. The request traverses
/// separate prefill and decode stages server-side but is observed here
/// as one SSE stream whose chunks carry stage lifetime events; the first
/// decode token and final completion are distinguishable.
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

pub struct DisaggClient {
    client: Client,
    config: ClientConfig,
}

#[derive(Debug, Serialize)]
struct DisaggRequest {
    prompt: String,
    max_tokens: u64,
    n: u32,
    best_of: u32,
    use_beam_search: bool,
    temperature: f64,
    top_p: f64,
    ignore_eos: bool,
    stream: bool,
}

/// One streamed chunk. `text` carries a decoded token; `lifetime_events`
/// marks stage transitions (e.g. prefill end, decode begin); `finished`
/// is set on the terminal chunk.
#[derive(Debug, Deserialize)]
struct DisaggChunk {
    text: Option<String>,
    #[serde(default)]
    lifetime_events: Vec<LifetimeEvent>,
    #[serde(default)]
    finished: bool,
}

#[derive(Debug, Deserialize)]
struct LifetimeEvent {
    #[allow(dead_code)]
    timestamp: f64,
    event_type: String,
}

impl DisaggClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let client = build_http_client(&config)?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl ProtocolClient for DisaggClient {
    async fn execute(&self, request: &RequestDescriptor) -> Result<StreamStats, RequestError> {
        let body = DisaggRequest {
            prompt: request.prompt.clone(),
            max_tokens: request.output_tokens,
            n: 1,
            best_of: 1,
            use_beam_search: false,
            temperature: 1.0,
            top_p: 1.0,
            ignore_eos: true,
            stream: true,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
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

            let chunk: DisaggChunk = serde_json::from_str(&event.data)
                .map_err(|e| RequestError::Stream(format!("bad chunk: {e}")))?;

            // The first decode token may be announced by a stage event
            // before any text arrives.
            let decode_started = chunk
                .lifetime_events
                .iter()
                .any(|ev| ev.event_type == "decode_begin" || ev.event_type == "prefill_end");
            if decode_started && first_token_offset.is_none() {
                first_token_offset = Some(started.elapsed());
            }

            if chunk.text.as_deref().is_some_and(|t| !t.is_empty()) {
                tokens_emitted += 1;
                if first_token_offset.is_none() {
                    first_token_offset = Some(started.elapsed());
                }
            }

            if chunk.finished {
                break;
            }
        }

        Ok(StreamStats {
            first_token_offset,
            total_duration: started.elapsed(),
            tokens_emitted,
        })
    }

    fn name(&self) -> &'static str {
        "disagg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor {
            id: 7,
            input_tokens: 4,
            output_tokens: 2,
            prompt: "the quick brown fox".into(),
            timestamp_ms: None,
        }
    }

    fn config(endpoint: String) -> ClientConfig {
        ClientConfig {
            endpoint,
            model: String::new(),
            api_key: None,
            connect_timeout: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn first_token_marked_by_stage_event_before_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/generate").json_body_partial(
                    r#"{"max_tokens": 2, "ignore_eos": true, "stream": true, "use_beam_search": false}"#,
                );
                then.status(200)
                    .header("Content-Type", "text/event-stream")
                    .body(concat!(
                        "data: {\"lifetime_events\":[{\"timestamp\":0.01,\"event_type\":\"prefill_end\"}]}\n\n",
                        "data: {\"text\":\"to\"}\n\n",
                        "data: {\"text\":\"ken\",\"finished\":true}\n\n",
                    ));
            })
            .await;

        let client = DisaggClient::new(config(server.url("/generate"))).expect("client");
        let stats = client.execute(&descriptor()).await.expect("stream decode");

        assert_eq!(stats.tokens_emitted, 2);
        let first = stats.first_token_offset.expect("first token mark");
        assert!(first <= stats.total_duration);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stream_without_terminal_chunk_still_completes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200)
                    .header("Content-Type", "text/event-stream")
                    .body("data: {\"text\":\"only\"}\n\ndata: [DONE]\n\n");
            })
            .await;

        let client = DisaggClient::new(config(server.url("/generate"))).expect("client");
        let stats = client.execute(&descriptor()).await.expect("stream decode");
        assert_eq!(stats.tokens_emitted, 1);
    }

    #[tokio::test]
    async fn api_error_is_contained() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(500).body("stage crash");
            })
            .await;

        let client = DisaggClient::new(config(server.url("/generate"))).expect("client");
        let err = client.execute(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), "api");
    }
}
