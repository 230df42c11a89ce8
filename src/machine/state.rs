//! The unit of work the turn machine drives

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::data::{DataError, Key, Userdata};
use crate::bus::ChannelError;

/// Errors a state can fail with instead of returning an outcome
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("state interrupted by shutdown")]
    Cancelled,
}

/// A named step of a turn
///
/// Implementations declare a fixed set of outcome labels and the turn data
/// keys they read and write. The machine validates its transition table
/// against these declarations once, at construction.
#[async_trait]
pub trait TurnState: Send + Sync {
    /// Every label `execute` may return
    fn outcomes(&self) -> &[&'static str];

    /// Keys this state reads
    fn input_keys(&self) -> &[Key] {
        &[]
    }

    /// Keys this state may write
    fn output_keys(&self) -> &[Key] {
        &[]
    }

    /// Keys guaranteed to be written when the state ends with `outcome`
    fn writes_on(&self, outcome: &str) -> &[Key] {
        let _ = outcome;
        self.output_keys()
    }

    /// Run the state once and report its outcome label
    async fn execute(
        &self,
        data: &mut Userdata<'_>,
        cancel: &CancellationToken,
    ) -> Result<&'static str, StateError>;
}
