//! Configuration types shared across courier crates.
//!
//! - [`timeouts`]: per-operation timeouts for the outbound SMTP client

pub mod timeouts;

pub use timeouts::ClientTimeouts;
