//! Phase 3 continued: compresses the raw tar through the requested
//! external compressor, falling back through `xz -> gzip -> none` (per
//! `CompressionType::fallback()`) when the requested binary is missing.

use std::path::{Path, PathBuf};

use proxsave_cmd::{CommandRunner, Invocation, RunContext, RunError};
use proxsave_core::manifest::CompressionType;

pub struct CompressOutcome {
    pub requested: CompressionType,
    pub effective: CompressionType,
    pub compressed_path: PathBuf,
}

fn binary_for(kind: CompressionType) -> Option<&'static str> {
    match kind {
        CompressionType::None => None,
        CompressionType::Gzip => Some("gzip"),
        CompressionType::Xz => Some("xz"),
        CompressionType::Zstd => Some("zstd"),
        CompressionType::Bzip2 => Some("bzip2"),
        CompressionType::Lzma => Some("lzma"),
    }
}

fn compress_args(kind: CompressionType, level: u32, threads: u32) -> Vec<String> {
    let mut args = vec!["-c".to_string()];
    if level > 0 {
        args.push(format!("-{level}"));
    }
    match kind {
        CompressionType::Xz | CompressionType::Zstd if threads > 1 => {
            args.push(format!("-T{threads}"));
        }
        _ => {}
    }
    args
}

/// Compresses `tar_path` in place (the output replaces the input under a
/// new name with the compression extension appended), trying `requested`
/// first and falling back per `CompressionType::fallback()` until a
/// working compressor is found or `none` is reached.
pub async fn compress_archive(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    tar_path: &Path,
    requested: CompressionType,
    level: u32,
    threads: u32,
) -> anyhow::Result<CompressOutcome> {
    let mut candidate = requested;
    loop {
        let Some(bin) = binary_for(candidate) else {
            // `none`: no compression, the tar file is the final archive.
            return Ok(CompressOutcome {
                requested,
                effective: CompressionType::None,
                compressed_path: tar_path.to_path_buf(),
            });
        };

        let data = tokio::fs::read(tar_path).await?;
        let invocation = Invocation::new(bin, compress_args(candidate, level, threads));
        match runner.run_stream(ctx, &invocation, Some(data)).await {
            Ok(mut reader) => {
                use tokio::io::AsyncReadExt as _;
                let mut out = Vec::new();
                reader.read_to_end(&mut out).await?;
                let out_path = {
                    let mut s = tar_path.as_os_str().to_os_string();
                    s.push(candidate.extension());
                    PathBuf::from(s)
                };
                tokio::fs::write(&out_path, &out).await?;
                if out_path != tar_path {
                    tokio::fs::remove_file(tar_path).await.ok();
                }
                return Ok(CompressOutcome {
                    requested,
                    effective: candidate,
                    compressed_path: out_path,
                });
            }
            Err(RunError::NotFound(_)) => {
                let next = candidate.fallback();
                if next == candidate {
                    anyhow::bail!("compressor unavailable and no further fallback: {bin}");
                }
                candidate = next;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
