use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use pep440_rs::Version;
use regex::Regex;
use tracing::*;

use super::PublishError;

/// A built distribution file (sdist or wheel) of one package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dist {
    /// The package name as given by the user.
    pub pkg: String,
    /// The PEP 503 form of `pkg`, which is the package's directory in the
    /// index.
    pub normalized_name: String,
    /// The file name.
    pub artifact: String,
    /// Where the file lives locally.
    pub path: PathBuf,
}

/// Normalize a project name per PEP 503: runs of `-`, `_` and `.` collapse to
/// a single `-`, and everything is lowercased.
pub fn normalized_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator_run = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator_run {
                normalized.push('-');
            }
            in_separator_run = true;
        } else {
            normalized.extend(c.to_lowercase());
            in_separator_run = false;
        }
    }
    normalized
}

/// The escaped name that wheel file names use (PEP 491): every run of
/// characters other than word characters and `.` becomes `_`.
pub fn wheel_name(name: &str) -> Result<String> {
    let escape = Regex::new(r"[^\w.]+")?;
    Ok(escape.replace_all(name, "_").into_owned())
}

/// Parse a version and render it in normalized PEP 440 form, so that e.g.
/// `0.1.0-beta1` matches files built as `0.1.0b1`.
pub fn normalized_version(version: &str) -> Result<String> {
    let parsed = version
        .trim()
        .parse::<Version>()
        .map_err(|e| PublishError::InvalidVersion {
            version: version.into(),
            reason: e.to_string(),
        })?;
    Ok(parsed.to_string())
}

/// Keep the file names that belong to `name` at `version`, in the order
/// given. Both sdist and wheel naming are accepted; `version` must already be
/// normalized.
pub fn filter_pkg_dists<'a, I>(files: I, name: &str, version: &str) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let pattern = format!(
        r"^({}|{})-{}[.-]",
        regex::escape(name),
        regex::escape(&wheel_name(name)?),
        regex::escape(version)
    );
    let matcher = Regex::new(&pattern)?;

    Ok(files
        .into_iter()
        .filter(|f| matcher.is_match(f))
        .map(String::from)
        .collect())
}

/// Find the dists of `name` at `version` in `project_path/dist_dir`.
pub async fn find_pkg_dists(
    project_path: &Path,
    dist_dir: &Path,
    name: &str,
    version: &str,
) -> Result<Vec<Dist>> {
    let dist_dir = project_path.join(dist_dir);
    info!("looking for package dists in {}", dist_dir.display());

    let mut read_dir = tokio::fs::read_dir(&dist_dir)
        .await
        .wrap_err_with(|| format!("failed to list {}", dist_dir.display()))?;
    let mut files = vec![];
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let is_file = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.is_file(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("skipping dangling entry {}", path.display());
                false
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("failed to stat {}", path.display()))
            }
        };
        if is_file {
            files.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    files.sort();
    debug!("found {} files in {}", files.len(), dist_dir.display());

    let normalized_name = normalized_name(name);
    Ok(filter_pkg_dists(files.iter().map(String::as_str), name, version)?
        .into_iter()
        .map(|artifact| Dist {
            pkg: name.to_string(),
            normalized_name: normalized_name.clone(),
            path: dist_dir.join(&artifact),
            artifact,
        })
        .collect())
}
