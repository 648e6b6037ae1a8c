//! The `courier` front-end: configuration discovery and the command line
//! around [`courier_delivery::Mailer`].

pub mod cli;
pub mod config;

pub use cli::Cli;
