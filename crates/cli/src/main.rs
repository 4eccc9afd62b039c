// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::debug;

use jotter::command;
use jotter::config::Cli;
use jotter_session::{FileStore, HttpAuthEndpoint, SessionTokens};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        if let Some(hint) = command::hint(&e) {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // reqwest is built without a bundled provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let credentials = cli.session.credentials_path();
    debug!(path = %credentials.display(), api_url = %cli.session.api_url, "opening session");

    let store = Arc::new(FileStore::new(credentials));
    let endpoint = Arc::new(HttpAuthEndpoint::new(cli.session.api_url.trim())?);
    let session = SessionTokens::new(store, endpoint, cli.session.settings());

    let mut stdout = std::io::stdout().lock();
    command::run(&session, &cli.command, &mut stdout).await
}
