// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands. User-facing output goes to stdout; diagnostics go
//! through tracing.

pub mod auth;
pub mod devices;
pub mod servers;

use crate::config::{Cli, Command};

/// Run the parsed subcommand.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    match &cli.command {
        Command::Login => auth::login(cli).await,
        Command::Logout => auth::logout(cli).await,
        Command::Status => {
            let store = cli.open_store()?;
            auth::status(&store, &cli.backend_url(&store), &cli.state_path(), &mut out)
        }
        Command::Start => crate::daemon::run(cli).await,
        Command::List => {
            let store = cli.open_store()?;
            servers::list(&store, &mut out)
        }
        Command::Add(args) => {
            let store = cli.open_store()?;
            servers::add(&store, args, &mut out)
        }
        Command::Remove { name } => {
            let store = cli.open_store()?;
            servers::remove(&store, name, &mut out)
        }
        Command::Enable { name } => {
            let store = cli.open_store()?;
            servers::set_enabled(&store, name, true, &mut out)
        }
        Command::Disable { name } => {
            let store = cli.open_store()?;
            servers::set_enabled(&store, name, false, &mut out)
        }
        Command::Devices(cmd) => devices::run(cli, cmd).await,
    }
}
