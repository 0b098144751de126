// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use crate::cli::ConnectArgs;
use crate::error::Result;

use super::load_config;

/// Print the effective configuration, after defaults and overrides.
pub fn run(path: Option<&Path>, args: &ConnectArgs) -> Result<()> {
    print!("{}", render(path, args)?);
    Ok(())
}

pub(crate) fn render(path: Option<&Path>, args: &ConnectArgs) -> Result<String> {
    let config = load_config(path, args)?;
    Ok(toml::to_string_pretty(&config)?)
}
