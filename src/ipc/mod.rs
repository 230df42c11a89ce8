//! IPC module bridging the message bus to other processes

mod protocol;
mod server;

pub use server::Server;
