//! Bundle writer and reader: the fixed-layout tar container around an
//! archive, its metadata sidecar, and its checksum sidecar.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tar::{Archive, Builder, EntryType, Header};

use crate::manifest::{bundle_filename, bundle_member_names, checksum_sidecar_line};

const BUNDLE_MODE: u32 = 0o640;
const CHECKSUM_POLL_INTERVAL: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("cancelled")]
    Cancelled,
    #[error("archive not found: {0}")]
    ArchiveMissing(PathBuf),
    #[error("bundle manifest member missing")]
    ManifestMissing,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Streams SHA-256 over `path`, polling `is_cancelled` every
/// `CHECKSUM_POLL_INTERVAL` bytes so a large archive's checksum can be
/// aborted promptly rather than only between files.
pub fn generate_checksum(
    path: &Path,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<String, BundleError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHECKSUM_POLL_INTERVAL];
    loop {
        if is_cancelled() {
            return Err(BundleError::Cancelled);
        }
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn fixed_header(size: u64, mtime: u64) -> Header {
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(BUNDLE_MODE);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(mtime);
    header.set_size(size);
    header
}

fn mtime_of(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the bundle tar for `archive_path`, whose `.metadata` and
/// (optional) `.sha256` sidecars live alongside it, and atomically write
/// it as `<archive_base>.bundle.tar` in the same directory. Returns the
/// bundle path.
pub fn create_bundle(archive_path: &Path) -> Result<PathBuf, BundleError> {
    if !archive_path.exists() {
        return Err(BundleError::ArchiveMissing(archive_path.to_path_buf()));
    }
    let dir = archive_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let basename = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let metadata_path = dir.join(format!("{basename}.metadata"));
    let checksum_path = dir.join(format!("{basename}.sha256"));
    let [metadata_member, archive_member, checksum_member] = bundle_member_names(&basename);

    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);

        append_member(&mut builder, &metadata_path, &metadata_member)?;
        append_member(&mut builder, archive_path, &archive_member)?;

        if checksum_path.exists() {
            append_member(&mut builder, &checksum_path, &checksum_member)?;
        } else {
            let digest = generate_checksum(archive_path, &|| false)?;
            let line = checksum_sidecar_line(&digest, &basename);
            let mut header = fixed_header(line.len() as u64, mtime_of(&fs::metadata(archive_path)?));
            builder.append_data(&mut header, &checksum_member, line.as_bytes())?;
        }

        builder.finish()?;
    }

    let bundle_path = dir.join(bundle_filename(&basename));
    proxsave_fs::atomic::write_file_atomic(&bundle_path, &tar_bytes, 0o640)?;
    Ok(bundle_path)
}

fn append_member<W: std::io::Write>(
    builder: &mut Builder<W>,
    source: &Path,
    member_name: &str,
) -> Result<(), BundleError> {
    let meta = fs::metadata(source)?;
    let mut header = fixed_header(meta.len(), mtime_of(&meta));
    let mut file = File::open(source)?;
    builder.append_data(&mut header, member_name, &mut file)?;
    Ok(())
}

/// Stream a bundle tar header-by-header and return the first member whose
/// name ends in `.metadata`, parsed as JSON. Never seeks: safe to feed
/// from a pipe (e.g. a remote `cat`).
pub fn inspect_bundle_manifest<R: Read>(reader: R) -> Result<serde_json::Value, BundleError> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        if path.ends_with(".metadata") {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(serde_json::from_slice(&buf)?);
        }
    }
    Err(BundleError::ManifestMissing)
}

/// Upper bound a caller should give a streaming remote read before
/// treating it as stuck; not enforced here, just the contract's advertised
/// default for callers that need one.
pub const DEFAULT_REMOTE_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{CompressionType, EncryptionMode, Manifest};
    use chrono::Utc;
    use serde_json::Map;
    use std::str::FromStr as _;

    fn sample_manifest(archive_path: &str) -> Manifest {
        Manifest {
            archive_path: archive_path.to_string(),
            archive_size: 4,
            sha256: "deadbeef".repeat(8),
            encryption_mode: EncryptionMode::None,
            compression_type: CompressionType::None,
            requested_compression_type: CompressionType::None,
            compression_mode: "default".to_string(),
            compression_level: 0,
            compression_threads: 1,
            created_at: chrono::DateTime::from_str("2026-01-01T00:00:00Z").unwrap(),
            script_version: "1.0.0".to_string(),
            hostname: "pve-node-1".to_string(),
            host_role: crate::category::HostRole::Virtualization,
            host_version: "8.2".to_string(),
            cluster_mode: false,
            targets: Default::default(),
            extra: Map::new(),
        }
    }

    fn write_fixture(dir: &Path, base: &str, body: &[u8]) -> PathBuf {
        let archive_path = dir.join(base);
        fs::write(&archive_path, body).unwrap();
        let manifest = sample_manifest(base);
        fs::write(
            dir.join(format!("{base}.metadata")),
            serde_json::to_vec(&manifest.to_json()).unwrap(),
        )
        .unwrap();
        archive_path
    }

    #[test]
    fn create_bundle_has_exactly_three_ordered_members() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = write_fixture(tmp.path(), "pve-backup.tar", b"payload");

        let bundle_path = create_bundle(&archive_path).unwrap();
        let bytes = fs::read(&bundle_path).unwrap();
        let mut archive = Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "pve-backup.tar.metadata".to_string(),
                "pve-backup.tar".to_string(),
                "pve-backup.tar.sha256".to_string(),
            ]
        );
    }

    #[test]
    fn create_bundle_synthesizes_checksum_when_sidecar_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = write_fixture(tmp.path(), "pve-backup.tar", b"payload");

        let bundle_path = create_bundle(&archive_path).unwrap();
        let bytes = fs::read(&bundle_path).unwrap();
        let manifest = inspect_bundle_manifest(&bytes[..]).unwrap();
        assert_eq!(manifest["archive_path"], "pve-backup.tar");
    }

    #[test]
    fn inspect_bundle_manifest_finds_metadata_first_without_seeking() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = write_fixture(tmp.path(), "pbs-backup.tar.gz", b"gz-bytes");
        let bundle_path = create_bundle(&archive_path).unwrap();

        let file = File::open(&bundle_path).unwrap();
        let manifest = inspect_bundle_manifest(file).unwrap();
        assert_eq!(manifest["hostname"], "pve-node-1");
    }

    #[test]
    fn create_bundle_missing_archive_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.tar");
        assert!(matches!(
            create_bundle(&missing),
            Err(BundleError::ArchiveMissing(_))
        ));
    }

    #[test]
    fn generate_checksum_respects_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big");
        fs::write(&path, vec![0u8; 1024]).unwrap();
        let err = generate_checksum(&path, &|| true).unwrap_err();
        assert!(matches!(err, BundleError::Cancelled));
    }
}
