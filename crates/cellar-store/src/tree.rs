//! Directory tree helpers that never follow symlinks.
//!
//! Wine prefixes contain links such as `dosdevices/z: -> /`; following them
//! while copying or deleting would escape the environment.

use crate::StoreError;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Recursively copy `src` onto `dst`, recreating symlinks as symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), StoreError> {
    let meta = src.symlink_metadata()?;
    if !meta.is_dir() {
        return Err(StoreError::NotADirectory(src.display().to_string()));
    }
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        copy_entry(&from, &to)?;
    }
    // Applied last so a read-only source directory can still be populated.
    fs::set_permissions(dst, meta.permissions())?;
    Ok(())
}

fn copy_entry(from: &Path, to: &Path) -> Result<(), StoreError> {
    let ft = from.symlink_metadata()?.file_type();
    if ft.is_symlink() {
        let target = fs::read_link(from)?;
        std::os::unix::fs::symlink(target, to)?;
    } else if ft.is_dir() {
        copy_tree(from, to)?;
    } else if ft.is_file() {
        fs::copy(from, to)?;
    } else {
        debug!("skipping special file {}", from.display());
    }
    Ok(())
}

/// Move `src` to `dst`. Falls back to copy-then-delete when the rename
/// crosses filesystems.
pub fn move_entry(src: &Path, dst: &Path) -> Result<(), StoreError> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(
                "rename {} -> {} crosses devices, copying",
                src.display(),
                dst.display()
            );
            let ft = src.symlink_metadata()?.file_type();
            if ft.is_dir() {
                copy_tree(src, dst)?;
            } else {
                copy_entry(src, dst)?;
            }
            remove_tree(src)
        }
        Err(e) => Err(e.into()),
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

/// Remove a file, symlink, or directory tree. Missing paths are not an error.
pub fn remove_tree(path: &Path) -> Result<(), StoreError> {
    let ft = match path.symlink_metadata() {
        Ok(meta) => meta.file_type(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if ft.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
