//! Atomic file replacement
//!
//! The credential file is rewritten in full on every save. Writing to a
//! sibling temp file and renaming it over the target means a concurrent
//! reader sees either the old file or the new one, never a truncated one.

use std::path::Path;

use tokio::io::AsyncWriteExt;

/// Replace `path` with `contents` atomically.
///
/// The temp file lives in the target's directory so the rename never crosses
/// a filesystem boundary. On unix the temp file is created with mode 0600,
/// so the contents are never readable by other users, not even briefly.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    // A leftover from a crashed run may carry wider permissions
    match tokio::fs::remove_file(&tmp_path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}
