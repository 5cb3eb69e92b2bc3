//! CLI command implementations
//!
//! Each subcommand lives in its own module. Everything here is orchestration
//! and terminal output; device matching comes from `kflash-core` and every
//! operation touching a board or the host system goes through
//! `kflash-flash`.

pub mod check;
pub mod flash;
pub mod list;
pub mod manage;

use std::path::PathBuf;

/// Expand a leading `~/` against the current home directory.
///
/// Registry values like `~/klipper` are written from the operator's point
/// of view; paths without the prefix pass through untouched.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_leaves_absolute_paths_alone() {
        assert_eq!(expand_tilde("/opt/katapult"), PathBuf::from("/opt/katapult"));
        assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn test_expand_tilde_rewrites_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/klipper"), home.join("klipper"));
        }
    }
}
