//! dialogue-turn-daemon: turn-taking coordinator for a voice robot
//!
//! One turn is: hear an utterance on the inbound topic, optionally run it
//! through the command interpreter, speak the result on the outbound topic.
//!
//! The daemon provides:
//! - An explicit, validated turn state machine (Hear, Interpret, Speak)
//! - An in-process message bus shared by all states
//! - An IPC server so recognizers and synthesizers in other processes can
//!   publish to and subscribe on the bus
//! - An Ollama-backed command interpreter

mod bus;
mod config;
mod events;
mod interpreter;
mod ipc;
mod lifecycle;
mod machine;
mod states;
mod wiring;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bus::{LocalBus, MessageChannel};
use crate::config::{Config, RunMode};
use crate::events::TurnEvent;
use crate::interpreter::{CommandInterpreter, OllamaInterpreter};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::machine::MachineError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "dialogue-turn-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        socket_path = ?config.socket_path,
        wiring = %config.wiring,
        on_timeout = %config.on_timeout,
        run_mode = %config.run_mode,
        "configuration loaded"
    );

    // Shutdown signals cancel this token
    let cancel = ShutdownSignal::new().listen()?;

    let bus = Arc::new(LocalBus::new());
    let channel: Arc<dyn MessageChannel> = bus.clone();

    // Turn machine -> IPC server (for status tracking)
    let (event_tx, _event_rx) = broadcast::channel::<TurnEvent>(64);
    let mut ipc_event_rx = event_tx.subscribe();

    let ollama = OllamaInterpreter::new(
        &config.ollama_url,
        config.ollama_model.as_str(),
        config.ollama_timeout,
    )?;
    info!(endpoint = ollama.endpoint(), model = %config.ollama_model, "command interpreter ready");
    let interpreter: Arc<dyn CommandInterpreter> = Arc::new(ollama);

    let machine = wiring::build(&config, Arc::clone(&channel), interpreter, event_tx)?;
    info!(
        initial = machine.initial(),
        outcomes = ?machine.outcomes(),
        "turn machine ready"
    );

    let server = Server::new(&config.socket_path, channel)?;
    let server_for_events = &server;

    info!("daemon initialized, starting turn machine");

    let outcome: Result<(), MachineError> = tokio::select! {
        // Drive the turn machine
        result = async {
            match config.run_mode {
                RunMode::Once => machine.execute(&cancel).await.map(|report| {
                    info!(
                        outcome = %report.outcome,
                        transitions = report.transitions,
                        heared_data = ?report.data.heared_data,
                        "turn complete"
                    );
                }),
                RunMode::Loop => machine.run(&cancel).await.map(|turns| {
                    info!(turns, "turn loop complete");
                }),
            }
        } => result,

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
            Ok(())
        }

        // Keep the IPC status view in sync with the machine
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => server_for_events.record_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "turn event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("turn event handler exited");
            Ok(())
        }
    };

    // Cleanup
    info!("shutting down...");

    cancel.cancel();
    while let Ok(event) = ipc_event_rx.try_recv() {
        server.record_event(&event).await;
    }
    let status = server.status().await;
    info!(
        turns = status.turns_completed,
        uptime_secs = status.uptime_secs,
        "final status"
    );
    server.shutdown().await;
    bus.close();

    match outcome {
        Ok(()) | Err(MachineError::Cancelled) => {
            info!("dialogue-turn-daemon stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "turn machine failed");
            Err(e.into())
        }
    }
}
