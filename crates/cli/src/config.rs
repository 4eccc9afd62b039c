// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use jotter_session::SessionSettings;

use crate::command::Command;

/// Keep a Jotter session signed in from the command line.
#[derive(Debug, Parser)]
#[command(name = "jotter", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Log format (json or text).
    #[arg(long, env = "JOTTER_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "JOTTER_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.session.validate()?;
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
    }
}

/// Where the session lives and how it is kept fresh.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Base URL of the Jotter API (e.g. https://api.jotter.app).
    #[arg(long, env = "JOTTER_API_URL")]
    pub api_url: String,

    /// Refresh the access token this many seconds before it expires.
    #[arg(long, env = "JOTTER_SKEW_SECS", default_value = "30")]
    pub skew_secs: u64,

    /// Give up on a refresh after this many milliseconds.
    #[arg(long, env = "JOTTER_REFRESH_TIMEOUT_MS", default_value = "10000")]
    pub refresh_timeout_ms: u64,

    /// Refuse to send a refresh that is not signed by the device key.
    #[arg(long, env = "JOTTER_REQUIRE_SIGNATURE")]
    pub require_signature: bool,

    /// Directory holding the credential file.
    #[arg(long, env = "JOTTER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl SessionArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.api_url.trim();
        if url.is_empty() {
            anyhow::bail!("--api-url must not be empty");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("--api-url must be an http(s) URL, got: {url}");
        }
        if self.refresh_timeout_ms == 0 {
            anyhow::bail!("--refresh-timeout-ms must be greater than zero");
        }
        Ok(())
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            skew_secs: self.skew_secs,
            refresh_timeout: self.refresh_timeout(),
            require_signature: self.require_signature,
        }
    }

    /// `--state-dir`, else `$XDG_STATE_HOME/jotter`, else
    /// `$HOME/.local/state/jotter`, else `.jotter` in the working directory.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Some(xdg) = non_empty_env("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("jotter");
        }
        if let Some(home) = non_empty_env("HOME") {
            return PathBuf::from(home).join(".local").join("state").join("jotter");
        }
        PathBuf::from(".jotter")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir().join("credentials.json")
    }
}

fn non_empty_env(key: &str) -> Option<std::ffi::OsString> {
    std::env::var_os(key).filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
