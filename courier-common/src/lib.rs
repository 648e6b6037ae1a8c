//! Pieces shared by every courier crate: logging bootstrap and the wire-level
//! log macros, audit events for delivery outcomes, and client timeout
//! configuration.

pub mod audit;
pub mod config;
pub mod logging;

pub use tracing;
