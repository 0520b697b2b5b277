//! Shared infrastructure for the catalog sync ingestion engine:
//! - the [`events`] system every resilience concern reports through
//! - the [`error`] taxonomy every component surfaces
//! - the [`config`] value types consumed (not parsed) by every component
//! - the [`domain`] types produced by the client and consumed by the writer

pub mod config;
pub mod domain;
pub mod error;
pub mod events;

pub use error::{ErrorCategory, ErrorRecord};
pub use events::{EngineEvent, EventListener, EventListeners, FnListener};
