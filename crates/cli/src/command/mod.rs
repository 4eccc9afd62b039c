// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `login`, `token`, `sign-out`, `status`, `device`.
//!
//! Results go to the writer handed in (stdout in the binary); diagnostics go
//! through `tracing` to stderr.

pub mod status;

use std::io::Write;

use jotter_session::{SessionError, SessionTokens};

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in with email and password.
    Login(LoginArgs),
    /// Print a valid access token, refreshing it first if needed.
    Token,
    /// Clear the stored session. The device key is kept.
    SignOut,
    /// Show the stored session.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Inspect or register this installation's device key.
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },
}

#[derive(clap::Args)]
pub struct LoginArgs {
    /// Account email.
    #[arg(long)]
    pub email: String,
    /// Account password.
    #[arg(long, env = "JOTTER_PASSWORD", hide_env_values = true)]
    pub password: String,
}

impl std::fmt::Debug for LoginArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginArgs").field("email", &self.email).finish_non_exhaustive()
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum DeviceCommand {
    /// Print the device public key and its fingerprint, creating the key on
    /// first use.
    Show,
    /// Register the device key with the server.
    Register {
        /// Human-readable device name.
        #[arg(long)]
        name: Option<String>,
    },
}

/// Run `command` against `session`, writing its result to `out`.
pub async fn run(
    session: &SessionTokens,
    command: &Command,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match command {
        Command::Login(args) => {
            let user = session.login(&args.email, &args.password).await?;
            writeln!(out, "{}", user.id)?;
        }
        Command::Token => {
            let token = session.get_valid_access_token().await?;
            writeln!(out, "{token}")?;
        }
        Command::SignOut => {
            session.sign_out().await?;
            writeln!(out, "signed out")?;
        }
        Command::Status { json } => {
            let status = session.status().await?;
            if *json {
                writeln!(out, "{}", serde_json::to_string_pretty(&status)?)?;
            } else {
                status::render(&status, out)?;
            }
        }
        Command::Device { command: DeviceCommand::Show } => {
            let keys = session.identity().ensure_keypair().await?;
            writeln!(out, "public key:  {}", keys.public_key_base64())?;
            writeln!(out, "fingerprint: {}", keys.fingerprint())?;
        }
        Command::Device { command: DeviceCommand::Register { name } } => {
            let registered = session.register_device(name.as_deref()).await?;
            writeln!(out, "{}", registered.device_id)?;
        }
    }
    Ok(())
}

/// A follow-up suggestion for errors the user can act on.
pub fn hint(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<SessionError>()? {
        e if e.requires_login() => Some("run `jotter login` to sign in again"),
        SessionError::Network(_) | SessionError::Timeout(_) => {
            Some("check --api-url and your connection, then retry")
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
