//! A sandboxed filesystem used by tests to simulate arbitrary trees,
//! including symlinks that would otherwise point outside the sandbox.

use std::path::{Component, Path, PathBuf};

use crate::real::RealFs;
use crate::{DirEntry, FileStat, FileSystem, OpenFlags, ReadSeek, ReadWriteSeek};

#[derive(Debug, Clone)]
pub struct FakeFs {
    root: PathBuf,
    inner: RealFs,
}

impl FakeFs {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            inner: RealFs::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an absolute or root-relative path into the sandbox. A path that
    /// is already under the sandbox root is left alone; anything else
    /// (including an absolute `/etc/...` path a category pattern would
    /// reference) is rebased onto the sandbox.
    fn sandbox_path(&self, path: &Path) -> PathBuf {
        if path.starts_with(&self.root) {
            return path.to_path_buf();
        }

        let mut rebased = self.root.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
                Component::ParentDir => {
                    rebased.pop();
                }
                Component::Normal(part) => rebased.push(part),
            }
        }
        rebased
    }
}

impl FileSystem for FakeFs {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn ReadSeek>> {
        self.inner.open(&self.sandbox_path(path))
    }

    fn create(&self, path: &Path, perm: u32) -> anyhow::Result<Box<dyn std::io::Write>> {
        self.inner.create(&self.sandbox_path(path), perm)
    }

    fn open_with_flags(&self, path: &Path, flags: OpenFlags) -> anyhow::Result<Box<dyn ReadWriteSeek>> {
        self.inner.open_with_flags(&self.sandbox_path(path), flags)
    }

    fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        self.inner.read_file(&self.sandbox_path(path))
    }

    fn write_file(&self, path: &Path, data: &[u8], perm: u32) -> anyhow::Result<()> {
        let resolved = self.sandbox_path(path);
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.inner.write_file(&resolved, data, perm)
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> anyhow::Result<()> {
        self.inner.mkdir_all(&self.sandbox_path(path), perm)
    }

    fn mkdir_temp(&self, base: &Path, pattern: &str) -> anyhow::Result<PathBuf> {
        self.inner.mkdir_temp(&self.sandbox_path(base), pattern)
    }

    fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>> {
        self.inner.read_dir(&self.sandbox_path(path))
    }

    fn stat(&self, path: &Path) -> anyhow::Result<FileStat> {
        self.inner.stat(&self.sandbox_path(path))
    }

    fn readlink(&self, path: &Path) -> anyhow::Result<PathBuf> {
        self.inner.readlink(&self.sandbox_path(path))
    }

    fn symlink(&self, target: &Path, link: &Path) -> anyhow::Result<()> {
        // Symlink targets are rebased into the sandbox too, so a "link to
        // an outside target" in test fixtures never escapes the sandbox.
        let resolved_target = self.sandbox_path(target);
        let resolved_link = self.sandbox_path(link);
        if let Some(parent) = resolved_link.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.inner.symlink(&resolved_target, &resolved_link)
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        self.inner.remove(&self.sandbox_path(path))
    }

    fn remove_all(&self, path: &Path) -> anyhow::Result<()> {
        self.inner.remove_all(&self.sandbox_path(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        let to_resolved = self.sandbox_path(to);
        if let Some(parent) = to_resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.inner.rename(&self.sandbox_path(from), &to_resolved)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.sandbox_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_rebased_under_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let fake = FakeFs::new(tmp.path().join("sandbox")).unwrap();

        fake.write_file(Path::new("/etc/hostname"), b"pve1", 0o644)
            .unwrap();

        assert!(tmp.path().join("sandbox/etc/hostname").exists());
        assert_eq!(
            fake.read_file(Path::new("/etc/hostname")).unwrap(),
            b"pve1"
        );
    }

    #[test]
    fn symlink_target_outside_sandbox_is_rebased() {
        let tmp = tempfile::tempdir().unwrap();
        let fake = FakeFs::new(tmp.path().join("sandbox")).unwrap();

        fake.write_file(Path::new("/etc/real"), b"data", 0o644)
            .unwrap();
        fake.symlink(Path::new("/etc/real"), Path::new("/etc/link"))
            .unwrap();

        let resolved = fake.readlink(Path::new("/etc/link")).unwrap();
        assert!(resolved.starts_with(tmp.path().join("sandbox")));
    }
}
