use std::path::{Path, PathBuf};

use directories_next::BaseDirs;
use tracing::*;

pub mod config;

/// Expand a leading `~` to the current user's home directory. Paths without
/// one, or hosts with no discoverable home directory, are returned as-is.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => {
            warn!("no home directory found, not expanding {path:?}");
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
#[allow(unused_must_use)]
pub fn test_init() {
    std::env::set_var("RUST_BACKTRACE", "full");
    std::panic::catch_unwind(|| {
        color_eyre::install();
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("pypi_private=debug"))
            .with_test_writer()
            .try_init();
    });
}
