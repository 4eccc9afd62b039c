// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable `jotter status`.

use std::io::Write;

use jotter_session::{RefreshPhase, SessionStatus};

pub fn render(status: &SessionStatus, out: &mut dyn Write) -> std::io::Result<()> {
    let signed_in = if status.signed_in { "yes" } else { "no" };
    let user = match &status.user {
        Some(u) => match &u.email {
            Some(email) => format!("{} ({email})", u.id),
            None => u.id.clone(),
        },
        None => "-".to_owned(),
    };
    let access = match (status.access_token_fresh, status.access_token_expires_in) {
        (true, secs) => format!("fresh, expires in {}", format_expires(secs)),
        (false, Some(_)) => "stale".to_owned(),
        (false, None) => "none".to_owned(),
    };
    let refresh = if status.has_refresh_token { "stored" } else { "none" };
    let phase = match status.refresh_phase {
        RefreshPhase::Idle => "idle",
        RefreshPhase::Refreshing => "refreshing",
    };

    writeln!(out, "{:<15}{signed_in}", "signed in:")?;
    writeln!(out, "{:<15}{user}", "user:")?;
    writeln!(out, "{:<15}{}", "device id:", status.device_id.as_deref().unwrap_or("-"))?;
    writeln!(out, "{:<15}{access}", "access token:")?;
    writeln!(out, "{:<15}{refresh}", "refresh token:")?;
    let key = status.device_fingerprint.as_deref().unwrap_or("none");
    writeln!(out, "{:<15}{key}", "device key:")?;
    writeln!(out, "{:<15}{phase}", "refresh:")?;
    Ok(())
}

fn format_expires(secs: Option<u64>) -> String {
    match secs {
        Some(s) => {
            let m = s / 60;
            let rem = s % 60;
            format!("{m}m {rem:02}s")
        }
        None => "-".to_owned(),
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
