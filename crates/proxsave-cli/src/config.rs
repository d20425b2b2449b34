//! Command-line surface: argument parsing and the translation from flags
//! into the library crates' own config types. A top-level `Cli` with
//! flattened logging/global args and a `Command` enum of subcommands.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use proxsave_backup::BackupConfig;
use proxsave_core::category::{BackupMode, HostRole};
use proxsave_core::manifest::CompressionType;
use proxsave_storage::RetentionPolicy;

#[derive(Debug, Parser)]
#[command(name = "proxsave", version, about = "Configuration backup/restore engine for Proxmox hosts", disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a backup and dispatch the bundle to every configured tier.
    Backup(BackupArgs),
    /// Restore from a previously created bundle.
    Restore(RestoreArgs),
    /// Print the effective configuration this invocation would use.
    Config(ConfigInspectArgs),
}

#[derive(Debug, Args, Clone)]
pub struct LoggingArgs {
    /// Logging filter (same syntax as RUST_LOG), e.g. `info`, `proxsave=debug`.
    #[arg(long, env = "PROXSAVE_LOG")]
    pub log: Option<String>,

    /// Optional log file path. When set, logs go to both console and file.
    #[arg(long, env = "PROXSAVE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log rotation for `--log-file` (default: daily).
    #[arg(long, env = "PROXSAVE_LOG_ROTATION", value_enum, default_value_t = LogRotation::Daily)]
    pub log_rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HostRoleArg {
    Pve,
    Pbs,
}

impl From<HostRoleArg> for HostRole {
    fn from(value: HostRoleArg) -> Self {
        match value {
            HostRoleArg::Pve => HostRole::Virtualization,
            HostRoleArg::Pbs => HostRole::BackupServer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackupModeArg {
    Quick,
    Full,
}

impl From<BackupModeArg> for BackupMode {
    fn from(value: BackupModeArg) -> Self {
        match value {
            BackupModeArg::Quick => BackupMode::Quick,
            BackupModeArg::Full => BackupMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompressionArg {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
}

impl From<CompressionArg> for CompressionType {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::None => CompressionType::None,
            CompressionArg::Gzip => CompressionType::Gzip,
            CompressionArg::Xz => CompressionType::Xz,
            CompressionArg::Zstd => CompressionType::Zstd,
            CompressionArg::Bzip2 => CompressionType::Bzip2,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct BackupArgs {
    /// Which host role to collect categories for.
    #[arg(long, value_enum, env = "PROXSAVE_HOST_ROLE")]
    pub host_role: HostRoleArg,

    /// Quick (a safe fast subset) or Full (every category, including export-only).
    #[arg(long, value_enum, default_value_t = BackupModeArg::Quick)]
    pub mode: BackupModeArg,

    /// Restrict to specific category ids (default: every category the mode selects).
    #[arg(long)]
    pub categories: Vec<String>,

    /// Directory bundles are written to.
    #[arg(long, env = "PROXSAVE_BACKUP_DIR", default_value = "/var/backups/proxsave")]
    pub backup_dir: PathBuf,

    /// Directory for prune/retention logs.
    #[arg(long, env = "PROXSAVE_LOG_DIR", default_value = "/var/log/proxsave")]
    pub log_dir: PathBuf,

    /// Compression algorithm (falls back to gzip, then none, if unavailable on this host).
    #[arg(long, value_enum, default_value_t = CompressionArg::Zstd)]
    pub compression: CompressionArg,

    #[arg(long, default_value_t = 3)]
    pub compression_level: u32,

    #[arg(long, default_value_t = 1)]
    pub compression_threads: u32,

    /// Age recipient strings (X25519 or SSH public keys). Omit for an unencrypted bundle.
    #[arg(long = "recipient")]
    pub recipients: Vec<String>,

    /// Keep at most this many backups per tier (0 disables the bound).
    #[arg(long, default_value_t = 0)]
    pub keep_backups: u64,

    /// Keep backups newer than this many days per tier (0 disables the bound).
    #[arg(long, default_value_t = 0)]
    pub keep_days: u64,

    /// Secondary local directory to also write the bundle to.
    #[arg(long)]
    pub secondary_dir: Option<PathBuf>,

    /// `rclone` remote reference (`remote:path`) for an additional cloud tier.
    #[arg(long, env = "PROXSAVE_CLOUD_REMOTE")]
    pub cloud_remote: Option<String>,

    /// Skip all destination writes; still produces a manifest and logs intended actions.
    #[arg(long)]
    pub dry_run: bool,

    /// Mark this backup as taken with cluster-wide coordination in effect.
    #[arg(long)]
    pub cluster_mode: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RestoreArgs {
    #[arg(long, value_enum, env = "PROXSAVE_HOST_ROLE")]
    pub host_role: HostRoleArg,

    /// Category ids to restore (default: every category the chosen bundle covers).
    #[arg(long)]
    pub categories: Vec<String>,

    /// Local backup directory to browse for candidates.
    #[arg(long, env = "PROXSAVE_BACKUP_DIR")]
    pub local_dir: Option<PathBuf>,

    /// Secondary local directory to also browse.
    #[arg(long)]
    pub secondary_dir: Option<PathBuf>,

    /// `rclone` remote reference to browse.
    #[arg(long, env = "PROXSAVE_CLOUD_REMOTE")]
    pub cloud_remote: Option<String>,

    /// Extract into this directory instead of applying live; nothing on
    /// the running system is touched.
    #[arg(long)]
    pub extract_only: Option<PathBuf>,

    /// Skip every destination write; logs what would have been copied.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the armed-rollback confirmation and post-apply repairs (used in cluster-safe contexts).
    #[arg(long)]
    pub cluster_safe_mode: bool,

    /// Run the post-apply repair pass (fstab merge, resolver, NIC rename, ZFS check).
    #[arg(long, default_value_t = true)]
    pub run_repairs: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ConfigInspectArgs {
    /// Output JSON instead of human-readable text.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub backup: BackupArgs,
}

impl BackupArgs {
    pub fn into_backup_config(self, app_name: impl Into<String>, hostname: String, script_version: String, host_version: String) -> BackupConfig {
        let retention = if self.keep_backups == 0 && self.keep_days == 0 {
            RetentionPolicy::disabled()
        } else {
            RetentionPolicy {
                kind: match (self.keep_backups > 0, self.keep_days > 0) {
                    (true, true) => proxsave_storage::RetentionKind::Both,
                    (true, false) => proxsave_storage::RetentionKind::MaxBackups,
                    _ => proxsave_storage::RetentionKind::MaxAge,
                },
                max_backups: (self.keep_backups > 0).then_some(self.keep_backups),
                max_age_days: (self.keep_days > 0).then_some(self.keep_days),
            }
        };

        BackupConfig {
            app_name: app_name.into(),
            backup_dir: self.backup_dir,
            log_dir: self.log_dir,
            host_role: self.host_role.into(),
            mode: self.mode.into(),
            categories: self.categories,
            compression: self.compression.into(),
            compression_mode: "auto".to_string(),
            compression_level: self.compression_level,
            compression_threads: self.compression_threads,
            recipients: self.recipients,
            retention,
            stale_lock_threshold: Duration::from_secs(3600),
            temp_dir_max_age: Duration::from_secs(7 * 24 * 3600),
            dry_run: self.dry_run,
            cluster_mode: self.cluster_mode,
            script_version,
            host_version,
            hostname,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_backup_invocation() {
        let cli = Cli::parse_from(["proxsave", "backup", "--host-role", "pve"]);
        match cli.command {
            Command::Backup(args) => {
                assert_eq!(args.host_role, HostRoleArg::Pve);
                assert_eq!(args.mode, BackupModeArg::Quick);
                assert!(!args.dry_run);
            }
            _ => panic!("expected backup subcommand"),
        }
    }

    #[test]
    fn retention_disabled_when_both_bounds_are_zero() {
        let args = BackupArgs {
            host_role: HostRoleArg::Pve,
            mode: BackupModeArg::Quick,
            categories: vec![],
            backup_dir: PathBuf::from("/tmp/x"),
            log_dir: PathBuf::from("/tmp/x"),
            compression: CompressionArg::Zstd,
            compression_level: 3,
            compression_threads: 1,
            recipients: vec![],
            keep_backups: 0,
            keep_days: 0,
            secondary_dir: None,
            cloud_remote: None,
            dry_run: false,
            cluster_mode: false,
        };
        let config = args.into_backup_config("proxsave", "host".to_string(), "0.1.0".to_string(), "8".to_string());
        assert!(config.retention.max_backups.is_none());
        assert!(config.retention.max_age_days.is_none());
    }
}
