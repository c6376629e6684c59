//! Global sequence assignment and the loop that drives it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StorageError;

/// Assigns global sequence numbers to unsequenced events.
#[async_trait]
pub trait PrimitiveEventSequencer: Send + Sync {
    /// Numbers one bounded batch of unsequenced events.
    ///
    /// Returns `true` if any event was numbered, `false` if nothing was
    /// waiting.
    async fn sequence(&self) -> Result<bool, StorageError>;
}

/// Idle durations used when the caller does not supply any.
pub const DEFAULT_IDLE_DURATIONS: [Duration; 5] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
];

/// Runs a sequencer until shutdown.
///
/// While batches keep coming back non-empty the sequencer is invoked again
/// immediately. When it reports no work, or a retryable error, the driver
/// sleeps for the next idle duration; the index saturates at the last entry
/// and resets as soon as work is found.
pub struct SequencerDriver {
    sequencer: Arc<dyn PrimitiveEventSequencer>,
    idle_durations: Vec<Duration>,
}

impl SequencerDriver {
    /// Creates a driver. An empty `idle_durations` falls back to
    /// [`DEFAULT_IDLE_DURATIONS`].
    #[must_use]
    pub fn new(sequencer: Arc<dyn PrimitiveEventSequencer>, idle_durations: Vec<Duration>) -> Self {
        let idle_durations = if idle_durations.is_empty() {
            DEFAULT_IDLE_DURATIONS.to_vec()
        } else {
            idle_durations
        };
        Self {
            sequencer,
            idle_durations,
        }
    }

    /// Loops until `shutdown` becomes `true` or is dropped.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error reported by the sequencer.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StorageError> {
        let mut idle_index = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.sequencer.sequence().await {
                Ok(true) => {
                    idle_index = 0;
                    continue;
                }
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, "sequencer run failed, retrying after idle");
                }
                Err(e) => {
                    tracing::error!(error = %e, "sequencer stopped");
                    return Err(e);
                }
            }

            let idle = self.idle_durations[idle_index];
            idle_index = (idle_index + 1).min(self.idle_durations.len() - 1);

            tokio::select! {
                () = tokio::time::sleep(idle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("sequencer driver shut down");
        Ok(())
    }
}
