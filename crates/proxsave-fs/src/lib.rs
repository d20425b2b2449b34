pub mod atomic;
pub mod fake;
pub mod real;

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Uniform file/dir/symlink/stat surface. A single
/// process-wide handle is normally injected at startup (the "real"
/// implementation); tests inject `fake::FakeFs` instead.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn ReadSeek>>;
    fn create(&self, path: &Path, perm: u32) -> anyhow::Result<Box<dyn Write>>;
    fn open_with_flags(&self, path: &Path, flags: OpenFlags) -> anyhow::Result<Box<dyn ReadWriteSeek>>;
    fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;
    fn write_file(&self, path: &Path, data: &[u8], perm: u32) -> anyhow::Result<()>;
    fn mkdir_all(&self, path: &Path, perm: u32) -> anyhow::Result<()>;
    fn mkdir_temp(&self, base: &Path, pattern: &str) -> anyhow::Result<PathBuf>;
    fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>>;
    fn stat(&self, path: &Path) -> anyhow::Result<FileStat>;
    fn readlink(&self, path: &Path) -> anyhow::Result<PathBuf>;
    fn symlink(&self, target: &Path, link: &Path) -> anyhow::Result<()>;
    fn remove(&self, path: &Path) -> anyhow::Result<()>;
    fn remove_all(&self, path: &Path) -> anyhow::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    /// Absolute path this implementation will actually touch for `path`.
    /// The real filesystem returns `path` unchanged; the fake filesystem
    /// prefixes the sandbox root.
    fn resolve(&self, path: &Path) -> PathBuf;
}

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

pub trait ReadWriteSeek: Read + Write + Seek {}
impl<T: Read + Write + Seek> ReadWriteSeek for T {}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    pub fn create_exclusive_write() -> Self {
        Self {
            write: true,
            create_new: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub mode: u32,
    pub mod_time: SystemTime,
}

#[derive(Debug, Clone)]
pub struct FileStat {
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mode: u32,
    pub mod_time: SystemTime,
    pub uid: u32,
    pub gid: u32,
}
