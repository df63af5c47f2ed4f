//! Filesystem helpers for the download pool

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Total size in bytes of every file under `path`
///
/// A missing directory counts as empty. Files that vanish while the tree is
/// being walked are ignored.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut total = 0;
    for entry in entries {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }

    Ok(total)
}

/// Keeps alphanumerics, spaces, `.`, `_` and `#`, then trims trailing spaces
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '#'))
        .collect();
    kept.trim_end().to_string()
}

/// File name of a downloaded binary: `{package}##{version}##{record}.apk`
pub fn record_file_name(package_id: &str, version_code: i64, record_id: i64) -> String {
    sanitize_filename(&format!(
        "{}##{}##{}.apk",
        package_id, version_code, record_id
    ))
}

/// Path a file is written to before being renamed into place
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".temp");
    PathBuf::from(name)
}

/// Writes `bytes` to a temporary sibling and renames it onto `path`
///
/// A reader never sees a partially written file under `path`.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);

    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp, path).await
}
