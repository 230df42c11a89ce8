//! Configuration loading and management

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Layout of the turn machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    /// Hear, then speak a fixed greeting
    Greeting,
    /// Hear, interpret into a command, speak the command
    Command,
    /// Hear, interpret into a command, answer it, speak the answer
    Conversation,
}

/// What the machine does when nothing is heard in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Go back to listening
    Retry,
    /// End the turn with the `timeout` outcome
    Terminate,
}

/// How many turns the daemon runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One turn, then exit
    Once,
    /// Turns back to back until shutdown
    Loop,
}

/// Unrecognized value for one of the enumerated settings
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseChoiceError {
    kind: &'static str,
    value: String,
}

impl ParseChoiceError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

impl FromStr for Wiring {
    type Err = ParseChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greeting" => Ok(Wiring::Greeting),
            "command" => Ok(Wiring::Command),
            "conversation" => Ok(Wiring::Conversation),
            _ => Err(ParseChoiceError::new("wiring", s)),
        }
    }
}

impl fmt::Display for Wiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wiring::Greeting => write!(f, "greeting"),
            Wiring::Command => write!(f, "command"),
            Wiring::Conversation => write!(f, "conversation"),
        }
    }
}

impl FromStr for TimeoutPolicy {
    type Err = ParseChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(TimeoutPolicy::Retry),
            "terminate" => Ok(TimeoutPolicy::Terminate),
            _ => Err(ParseChoiceError::new("timeout policy", s)),
        }
    }
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPolicy::Retry => write!(f, "retry"),
            TimeoutPolicy::Terminate => write!(f, "terminate"),
        }
    }
}

impl FromStr for RunMode {
    type Err = ParseChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(RunMode::Once),
            "loop" => Ok(RunMode::Loop),
            _ => Err(ParseChoiceError::new("run mode", s)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Once => write!(f, "once"),
            RunMode::Loop => write!(f, "loop"),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Topic carrying recognized utterances
    pub inbound_topic: String,

    /// Topic carrying text to synthesize
    pub outbound_topic: String,

    /// How long the hear state listens
    pub hear_timeout: Duration,

    /// Pause before each publish on the outbound topic
    pub settle_delay: Duration,

    pub wiring: Wiring,
    pub on_timeout: TimeoutPolicy,
    pub run_mode: RunMode,

    /// Text spoken by the greeting wiring
    pub greeting: String,

    /// Base URL of the Ollama server
    pub ollama_url: String,
    pub ollama_model: String,
    pub ollama_timeout: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("dialogue-turn");

        let socket_path = lookup("TURN_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        Ok(Self {
            socket_path,
            data_dir,
            inbound_topic: lookup("TURN_INBOUND_TOPIC").unwrap_or_else(|| "recognized_speech".into()),
            outbound_topic: lookup("TURN_OUTBOUND_TOPIC").unwrap_or_else(|| "say".into()),
            hear_timeout: Duration::from_millis(parse_or(&lookup, "TURN_HEAR_TIMEOUT_MS", 10_000)?),
            settle_delay: Duration::from_millis(parse_or(&lookup, "TURN_SETTLE_DELAY_MS", 1_000)?),
            wiring: parse_or(&lookup, "TURN_WIRING", Wiring::Command)?,
            on_timeout: parse_or(&lookup, "TURN_ON_TIMEOUT", TimeoutPolicy::Retry)?,
            run_mode: parse_or(&lookup, "TURN_RUN_MODE", RunMode::Once)?,
            greeting: lookup("TURN_GREETING").unwrap_or_else(|| "Hello, this is a test message".into()),
            ollama_url: lookup("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".into()),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3".into()),
            ollama_timeout: Duration::from_secs(parse_or(&lookup, "OLLAMA_TIMEOUT_SECS", 60)?),
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        None => Ok(default),
    }
}
