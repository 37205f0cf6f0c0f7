// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variable access for the daemon.

use std::path::PathBuf;

/// Generated environment variable name constants.
pub mod names {
    include!(concat!(env!("OUT_DIR"), "/env_names.rs"));
}

/// Returns the value of `OFFSYNC_STATE_DIR` if set.
pub fn state_dir() -> Option<PathBuf> {
    std::env::var(names::OFFSYNC_STATE_DIR).ok().map(PathBuf::from)
}

/// Returns the value of `XDG_STATE_HOME` if set.
pub fn xdg_state_home() -> Option<PathBuf> {
    std::env::var(names::XDG_STATE_HOME).ok().map(PathBuf::from)
}

/// Returns the value of `OFFSYNC_REMOTE_URL` if set and non-empty.
pub fn remote_url() -> Option<String> {
    std::env::var(names::OFFSYNC_REMOTE_URL).ok().filter(|url| !url.is_empty())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
