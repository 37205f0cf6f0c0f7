// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the daemon from starting or running.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file {}: {source}", path.display())]
    ConfigParse { path: PathBuf, source: toml::de::Error },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Engine(#[from] offsync_core::Error),

    #[error("another daemon instance is already running\n  hint: stop it first or use a different --state-dir")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
