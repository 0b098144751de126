// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

// Allow unused items: test helpers are shared across multiple test binaries,
// and not every test file uses every helper.
#![allow(dead_code)]
#![allow(unused_imports)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;

pub use predicates::prelude::*;
pub use tempfile::TempDir;

/// `poslink` with a clean environment: no POSLINK_* variables and a config
/// home inside `home`, so no user config file is picked up.
pub fn poslink(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("poslink");
    for var in [
        "POSLINK_URL",
        "POSLINK_TOKEN",
        "POSLINK_USER",
        "POSLINK_SCOPE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"));
    cmd
}

/// Writes `content` as a config file under `home` and returns its path.
pub fn write_config(home: &TempDir, content: &str) -> std::path::PathBuf {
    let path = home.path().join("poslink.toml");
    std::fs::write(&path, content).unwrap();
    path
}
