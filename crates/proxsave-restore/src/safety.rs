//! Per-group safety backups taken immediately before a category group is
//! applied: a gzipped tar of the exact live files the group covers,
//! written to `/tmp/<app>/safety-<ts>-<group>.tar.gz`. The armed-rollback
//! script (see [`crate::rollback`]) re-extracts this file verbatim.

use std::path::{Path, PathBuf};

use proxsave_cmd::{CommandRunner, Invocation, RunContext};
use proxsave_core::category::Category;
use proxsave_core::clock::Clock;
use tar::Builder;

use crate::staging::APP_NAME;

/// Builds an in-memory tar of whatever `paths` currently resolve to under
/// `live_root` (missing entries are skipped, not an error: a category's
/// paths commonly don't all exist on a fresh host), then pipes it through
/// external `gzip` the same way `proxsave_backup::compress` does, and
/// writes the result to the fixed safety-backup path.
pub async fn take_safety_backup(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    clock: &dyn Clock,
    live_root: &Path,
    group_name: &str,
    categories: &[&Category],
) -> anyhow::Result<PathBuf> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);
        for cat in categories {
            for pattern in cat.paths {
                append_if_present(&mut builder, live_root, pattern)?;
            }
        }
        builder.finish()?;
    }

    let invocation = Invocation::new("gzip", vec!["-c".to_string()]);
    let gz_bytes = match runner.run_stream(ctx, &invocation, Some(tar_bytes.clone())).await {
        Ok(mut reader) => {
            use tokio::io::AsyncReadExt as _;
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await?;
            out
        }
        Err(_) => tar_bytes, // gzip unavailable: fall back to an uncompressed tar, still restorable.
    };

    let dest = std::env::temp_dir().join(APP_NAME).join(format!(
        "safety-{}-{group_name}.tar.gz",
        clock.now().format("%Y%m%d-%H%M%S")
    ));
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&dest, &gz_bytes).await?;
    Ok(dest)
}

fn append_if_present<W: std::io::Write>(
    builder: &mut Builder<W>,
    live_root: &Path,
    pattern: &str,
) -> anyhow::Result<()> {
    let relative = pattern.trim_start_matches("./");
    let full = live_root.join(relative);
    if !full.exists() {
        return Ok(());
    }
    if full.is_dir() {
        builder.append_dir_all(relative, &full)?;
    } else {
        builder.append_path_with_name(&full, relative)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxsave_cmd::fake::{FakeRunError, FakeRunner, ScriptedResponse};
    use proxsave_core::category::{by_id, HostRole};
    use proxsave_core::clock::FakeClock;
    use tar::Archive;

    #[tokio::test]
    async fn safety_backup_skips_missing_paths_and_compresses() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc")).unwrap();
        std::fs::write(tmp.path().join("etc/hostname"), b"pve1").unwrap();

        let runner = FakeRunner::new();
        runner.script_success("gzip", b"gz-bytes".to_vec());
        let ctx = RunContext::new();
        let clock = FakeClock::new(chrono::Utc::now());

        let network = by_id("network").unwrap();
        let dest = take_safety_backup(&runner, &ctx, &clock, tmp.path(), "normal", &[network])
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"gz-bytes");
    }

    #[tokio::test]
    async fn falls_back_to_uncompressed_tar_when_gzip_missing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("etc")).unwrap();
        std::fs::write(tmp.path().join("etc/hostname"), b"pve1").unwrap();

        let runner = FakeRunner::new();
        runner.script("gzip", ScriptedResponse { output: Err(FakeRunError::NotFound) });
        let ctx = RunContext::new();
        let clock = FakeClock::new(chrono::Utc::now());

        let network = by_id("network").unwrap();
        let dest = take_safety_backup(&runner, &ctx, &clock, tmp.path(), "normal", &[network])
            .await
            .unwrap();

        let bytes = tokio::fs::read(&dest).await.unwrap();
        let mut archive = Archive::new(&bytes[..]);
        let names: Vec<_> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("hostname")));
        let _ = HostRole::Virtualization;
    }
}
