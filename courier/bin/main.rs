#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::process::ExitCode;

use clap::Parser;
use courier::Cli;
use courier_common::logging;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init();

    Cli::parse().run().await
}
