// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Determine default absolute path to configuration directory.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotstate` as the default
/// absolute path. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotstate"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to configuration file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_config_file() -> Result<PathBuf> {
    default_config_dir().map(|path| path.join("dotstate.toml"))
}

/// Determine default absolute path to persistent state file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_state_file() -> Result<PathBuf> {
    default_config_dir().map(|path| path.join("dotstate.sqlite3"))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[cfg(target_os = "linux")]
    #[sealed_test(env = [("HOME", "/home/blah"), ("XDG_CONFIG_HOME", "/home/blah/.config")])]
    fn default_paths_follow_xdg() -> anyhow::Result<()> {
        assert_eq!(
            default_config_file()?,
            PathBuf::from("/home/blah/.config/dotstate/dotstate.toml")
        );
        assert_eq!(
            default_state_file()?,
            PathBuf::from("/home/blah/.config/dotstate/dotstate.sqlite3")
        );

        Ok(())
    }
}
