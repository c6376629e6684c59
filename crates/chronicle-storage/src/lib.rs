//! Chronicle Storage: `PostgreSQL` persistence for the primitive event log.

mod error;
mod row;

pub mod event_type_repository;
pub mod id_key_repository;
pub mod lock;
pub mod migrator;
pub mod primitive_event_query;
pub mod primitive_event_repository;
pub mod schema;
pub mod sequencer;
pub mod storage;

pub use storage::{Storage, connect_pool};
