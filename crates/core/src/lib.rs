//! Shared domain types for the report bridge: job identifiers, the job
//! state machine, engine result classification, the error taxonomy and the
//! Config Resolver.

pub mod config;
pub mod error;
pub mod job;
pub mod results;
pub mod script;
pub mod types;
