//! Storage abstractions implemented by the backing engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use crate::event::PrimitiveEvent;
use crate::specification::Specification;

/// Interns event type names to stable identifiers.
#[async_trait]
pub trait EventTypeRepository: Send + Sync {
    /// Returns the identifier for `type_name`, creating it on first use.
    /// Names are case-normalized, so `"OrderPlaced"` and `"orderplaced"`
    /// resolve to the same identifier.
    async fn id_for(&self, type_name: &str) -> Result<Uuid, StorageError>;
}

/// Globally unique mapping from external keys to aggregate identities.
#[async_trait]
pub trait IdKeyRepository: Send + Sync {
    /// Maps `key` to `id`. Fails with `DuplicateKey` if the key exists.
    async fn add(&self, id: Uuid, key: &str) -> Result<(), StorageError>;

    /// Returns the identity `key` maps to.
    async fn find(&self, key: &str) -> Result<Option<Uuid>, StorageError>;

    async fn contains_key(&self, key: &str) -> Result<bool, StorageError>;

    async fn contains_id(&self, id: Uuid) -> Result<bool, StorageError>;

    /// Renames `key` to `rekey` atomically. Fails with `DuplicateKey` if
    /// `rekey` is already mapped.
    async fn rekey(&self, key: &str, rekey: &str) -> Result<(), StorageError>;

    async fn remove_key(&self, key: &str) -> Result<(), StorageError>;

    /// Removes every key owned by `id`.
    async fn remove_id(&self, id: Uuid) -> Result<(), StorageError>;
}

/// Write side of the primitive event log.
#[async_trait]
pub trait PrimitiveEventRepository: Send + Sync {
    /// Appends unsequenced events as one unit of work.
    ///
    /// Fails with `DuplicateVersion` if any `(id, version)` already exists,
    /// in which case nothing from the batch is stored.
    async fn append(&self, events: &[PrimitiveEvent]) -> Result<(), StorageError>;

    /// Loads the full history of one aggregate, ordered by version.
    async fn get(&self, id: Uuid) -> Result<Vec<PrimitiveEvent>, StorageError>;

    /// Deletes every event of one aggregate. Sequence numbers are not reused.
    async fn remove(&self, id: Uuid) -> Result<(), StorageError>;

    /// Deletes the events matching `specification` and returns the count.
    /// An unfiltered specification removes nothing.
    async fn remove_matching(&self, specification: &Specification) -> Result<u64, StorageError>;

    /// Highest assigned sequence number in the log, `0` when none.
    async fn max_sequence_number(&self) -> Result<i64, StorageError>;

    /// Sequence number assigned to the event with `event_id`, if any.
    async fn sequence_number_of(&self, event_id: Uuid) -> Result<Option<i64>, StorageError>;
}

/// Read side of the primitive event log.
#[async_trait]
pub trait PrimitiveEventQuery: Send + Sync {
    /// Returns matching events ordered by sequence number.
    async fn search(
        &self,
        specification: &Specification,
    ) -> Result<Vec<PrimitiveEvent>, StorageError>;

    /// Highest assigned sequence number among matching events.
    async fn max_sequence_number(
        &self,
        specification: &Specification,
    ) -> Result<Option<i64>, StorageError>;
}
