// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;

mod bayeux;
mod cli;
mod config;
mod logging;
mod native;
mod protocol;
mod registry;
mod server;
mod session;
mod state;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    cli::handle_command(&cli, logging::init_logging).await;
}
