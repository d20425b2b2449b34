//! Phase 6, Encrypt (optional): re-streams the compressed archive through
//! an age encryption writer keyed by the prepared recipients, then renames
//! the result to carry the `.age` marker the manifest invariant expects.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use proxsave_crypto::recipient::parse_recipients;
use proxsave_crypto::stream::encrypt_writer;

pub struct EncryptOutcome {
    pub encrypted_path: PathBuf,
}

/// Encrypts `plain_path` in place: writes `<plain_path>.age`, then removes
/// the plaintext. The manifest's own `sha256`/`archive_size` must be
/// recomputed by the caller over the plaintext *before* calling this, and
/// a fresh `.sha256` sidecar written over the encrypted bytes afterward.
pub fn encrypt_archive(plain_path: &Path, recipients: &[String]) -> anyhow::Result<EncryptOutcome> {
    let recipients = parse_recipients(recipients)?;
    let plaintext = std::fs::read(plain_path)?;

    let encrypted_path = {
        let mut s = plain_path.as_os_str().to_os_string();
        s.push(".age");
        PathBuf::from(s)
    };

    let out_file = std::fs::File::create(&encrypted_path)?;
    let mut writer = encrypt_writer(recipients, out_file)?;
    writer.write_all(&plaintext)?;
    writer.finish()?;

    std::fs::remove_file(plain_path)?;
    Ok(EncryptOutcome { encrypted_path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypts_and_replaces_plaintext() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("archive.tar.gz");
        std::fs::write(&plain, b"compressed-bytes").unwrap();

        let identity = age::x25519::Identity::generate();
        let recipient = identity.to_public().to_string();

        let outcome = encrypt_archive(&plain, &[recipient]).unwrap();
        assert!(!plain.exists());
        assert!(outcome.encrypted_path.ends_with("archive.tar.gz.age"));
        assert_ne!(std::fs::read(&outcome.encrypted_path).unwrap(), b"compressed-bytes");
    }
}
