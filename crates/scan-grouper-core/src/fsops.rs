//! File relocation primitives used by the grouping engines.
//!
//! Every mutation is logged through [`crate::logging::log_fs_modification`]
//! so a run leaves an auditable trail of what moved where.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::logging::log_fs_modification;

/// Create a directory (and parents) if it does not exist
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        log_fs_modification("mkdir", path, None);
    }
    Ok(())
}

/// Copy `src` into directory `dir`, keeping its file name.
///
/// Returns the destination path. An existing destination is overwritten,
/// which makes re-copying after an interrupted run idempotent.
pub fn copy_into(src: &Path, dir: &Path) -> Result<PathBuf> {
    let dst = dir.join(file_name(src)?);
    fs::copy(src, &dst)?;
    log_fs_modification("copy", &dst, Some(&format!("from {}", src.display())));
    Ok(dst)
}

/// Move `src` into directory `dir`, keeping its file name.
///
/// Uses `rename` when possible; falls back to copy-then-remove when the
/// destination is on another filesystem.
pub fn move_into(src: &Path, dir: &Path) -> Result<PathBuf> {
    let dst = dir.join(file_name(src)?);
    if fs::rename(src, &dst).is_err() {
        fs::copy(src, &dst)?;
        fs::remove_file(src)?;
    }
    log_fs_modification("move", &dst, Some(&format!("from {}", src.display())));
    Ok(dst)
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| Error::FileNotFound(path.to_path_buf()))
}

// -- Tests --

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(path: &Path, contents: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    #[test]
    fn test_copy_into_keeps_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        write_file(&src, b"data");
        let out = dir.path().join("out");
        ensure_dir(&out).unwrap();

        let dst = copy_into(&src, &out).unwrap();
        assert_eq!(dst, out.join("a.jpg"));
        assert!(src.exists());
        assert!(dst.exists());
    }

    #[test]
    fn test_copy_into_overwrites() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        write_file(&src, b"new");
        let out = dir.path().join("out");
        ensure_dir(&out).unwrap();
        write_file(&out.join("a.jpg"), b"old");

        copy_into(&src, &out).unwrap();
        assert_eq!(fs::read(out.join("a.jpg")).unwrap(), b"new");
    }

    #[test]
    fn test_move_into_removes_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        write_file(&src, b"data");
        let out = dir.path().join("out");
        ensure_dir(&out).unwrap();

        let dst = move_into(&src, &out).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst).unwrap(), b"data");
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
