//! Chronicle Core: storage abstractions for the primitive event log.
//!
//! This crate defines the data model, the search specification, the error
//! taxonomy, configuration and the traits every backing engine implements.
//! It contains no database code.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod repository;
pub mod sequencer;
pub mod specification;
