//! Scripted sequencer that replays predetermined results.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::StorageError;
use chronicle_core::sequencer::PrimitiveEventSequencer;
use tokio::time::Instant;

/// A sequencer that returns results from a script and then reports "no
/// work" forever. Records the instant of every call.
#[derive(Debug)]
pub struct ScriptedSequencer {
    script: Mutex<VecDeque<Result<bool, StorageError>>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedSequencer {
    #[must_use]
    pub fn new(script: Vec<Result<bool, StorageError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of `sequence` calls so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Instants at which `sequence` was called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrimitiveEventSequencer for ScriptedSequencer {
    async fn sequence(&self) -> Result<bool, StorageError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(false))
    }
}
