// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use companion::config::Cli;
use companion::error::{exit_code_for, EXIT_OK};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    match companion::command::dispatch(&cli).await {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}
