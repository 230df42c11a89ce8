//! Command interpreter module
//!
//! The natural-language side of a turn: an utterance goes in, a command or
//! answer string comes out. The daemon talks to a local Ollama server.

mod ollama;

pub use ollama::OllamaInterpreter;

use async_trait::async_trait;

/// Errors raised while interpreting an utterance
#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("interpreter request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("interpreter returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode interpreter response: {0}")]
    Decode(String),
}

/// Turns an utterance into a response string
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    /// Interpret `query` and return the raw response text
    async fn process(&self, query: &str) -> Result<String, InterpretError>;
}
