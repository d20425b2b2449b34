//! The "real" filesystem handle: operates directly on the host filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{DirEntry, FileStat, FileSystem, OpenFlags, ReadSeek, ReadWriteSeek};

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

fn to_dir_entry(entry: fs::DirEntry) -> anyhow::Result<DirEntry> {
    let meta = entry.metadata()?;
    Ok(DirEntry {
        name: entry.file_name().to_string_lossy().to_string(),
        is_dir: meta.is_dir(),
        mode: file_mode(&meta),
        mod_time: meta.modified()?,
    })
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

#[cfg(unix)]
fn owner_ids(meta: &fs::Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt as _;
    (meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn owner_ids(_meta: &fs::Metadata) -> (u32, u32) {
    (0, 0)
}

#[cfg(unix)]
fn set_perm(path: &Path, perm: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(perm))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_perm(_path: &Path, _perm: u32) -> anyhow::Result<()> {
    Ok(())
}

impl FileSystem for RealFs {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(File::open(path)?))
    }

    fn create(&self, path: &Path, perm: u32) -> anyhow::Result<Box<dyn Write>> {
        let file = File::create(path)?;
        set_perm(path, perm)?;
        Ok(Box::new(file))
    }

    fn open_with_flags(&self, path: &Path, flags: OpenFlags) -> anyhow::Result<Box<dyn ReadWriteSeek>> {
        let file = OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .create_new(flags.create_new)
            .truncate(flags.truncate)
            .append(flags.append)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn write_file(&self, path: &Path, data: &[u8], perm: u32) -> anyhow::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(data)?;
        set_perm(path, perm)?;
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> anyhow::Result<()> {
        fs::create_dir_all(path)?;
        set_perm(path, perm)?;
        Ok(())
    }

    fn mkdir_temp(&self, base: &Path, pattern: &str) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new()
            .prefix(pattern)
            .tempdir_in(base)?
            .keep();
        Ok(dir)
    }

    fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            out.push(to_dir_entry(entry?)?);
        }
        Ok(out)
    }

    fn stat(&self, path: &Path) -> anyhow::Result<FileStat> {
        let meta = fs::symlink_metadata(path)?;
        let (uid, gid) = owner_ids(&meta);
        Ok(FileStat {
            is_dir: meta.is_dir(),
            is_symlink: meta.is_symlink(),
            size: meta.len(),
            mode: file_mode(&meta),
            mod_time: meta.modified()?,
            uid,
            gid,
        })
    }

    fn readlink(&self, path: &Path) -> anyhow::Result<PathBuf> {
        Ok(fs::read_link(path)?)
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> anyhow::Result<()> {
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn symlink(&self, target: &Path, link: &Path) -> anyhow::Result<()> {
        std::os::windows::fs::symlink_file(target, link)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> anyhow::Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                // remove_dir_all fails on a plain file target; fall back.
                if fs::remove_file(path).is_ok() {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = RealFs::new();
        let path = tmp.path().join("a.txt");
        fs.write_file(&path, b"hello", 0o640).unwrap();
        assert_eq!(fs.read_file(&path).unwrap(), b"hello");
    }

    #[test]
    fn mkdir_temp_creates_unique_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = RealFs::new();
        let a = fs.mkdir_temp(tmp.path(), "stage-").unwrap();
        let b = fs.mkdir_temp(tmp.path(), "stage-").unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
    }

    #[test]
    fn remove_all_is_idempotent_on_missing_path() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = RealFs::new();
        fs.remove_all(&tmp.path().join("missing")).unwrap();
    }
}
