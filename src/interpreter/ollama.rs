//! Ollama-backed command interpreter
//!
//! Sends the utterance as a non-streaming `/api/generate` request and
//! returns the generated `response` text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CommandInterpreter, InterpretError};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Interpreter calling an Ollama server over HTTP
pub struct OllamaInterpreter {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaInterpreter {
    /// Create an interpreter for `model` served at `base_url`
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self, InterpretError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    /// Full URL requests are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandInterpreter for OllamaInterpreter {
    async fn process(&self, query: &str) -> Result<String, InterpretError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: query,
            stream: false,
        };

        debug!(model = %self.model, endpoint = %self.endpoint, "sending query to interpreter");

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(InterpretError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| InterpretError::Decode(format!("{e} - body: {body}")))?;

        Ok(generated.response.trim().to_owned())
    }
}
