mod config;
mod logging;
mod ui;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use proxsave_backup::collect::RegistryCollector;
use proxsave_backup::pipeline::ConfiguredRecipients;
use proxsave_cmd::real::RealRunner;
use proxsave_cmd::{CommandRunner, RunContext};
use proxsave_core::clock::SystemClock;
use proxsave_restore::discovery::SourceConfig;
use proxsave_restore::RestoreConfig;
use proxsave_storage::tier::local::LocalTier;
use proxsave_storage::tier::rclone::RcloneTier;
use proxsave_storage::StorageTarget;

use config::{Cli, Command, ConfigInspectArgs, RestoreArgs};

const APP_NAME: &str = "proxsave";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.logging)?;

    match cli.command {
        Command::Backup(args) => run_backup(args).await,
        Command::Restore(args) => run_restore(args).await,
        Command::Config(args) => run_config(args),
    }
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

async fn run_backup(args: config::BackupArgs) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(RealRunner::new());
    let ctx = RunContext::new();

    let backup_dir = args.backup_dir.clone();
    let secondary_dir = args.secondary_dir.clone();
    let cloud_remote = args.cloud_remote.clone();

    let backup_config = args.into_backup_config(APP_NAME, hostname(), env!("CARGO_PKG_VERSION").to_string(), "unknown".to_string());

    let mut tiers: Vec<Box<dyn StorageTarget>> = vec![Box::new(LocalTier::new("primary", backup_dir, true, true))];
    if let Some(dir) = secondary_dir {
        tiers.push(Box::new(LocalTier::new("secondary", dir, true, false)));
    }
    if let Some(remote_ref) = cloud_remote {
        tiers.push(Box::new(RcloneTier::new("cloud", remote_ref, runner.clone(), true, false)));
    }

    let collector = RegistryCollector;
    let recipients = ConfiguredRecipients;

    match proxsave_backup::run_backup(&backup_config, &collector, &recipients, &tiers, runner.as_ref(), &ctx).await {
        Ok(outcome) => {
            println!(
                "backup complete: {} tier(s), {} warning(s)",
                outcome.stats.tiers.len(),
                outcome.stats.warnings
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("backup failed: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn build_source_config(local_dir: Option<std::path::PathBuf>, secondary_dir: Option<std::path::PathBuf>, cloud_remote: Option<String>) -> SourceConfig {
    SourceConfig {
        local_dir,
        secondary_dir,
        cloud_ref: cloud_remote,
    }
}

async fn run_restore(args: RestoreArgs) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(RealRunner::new());
    let ctx = RunContext::new();
    let clock = SystemClock::default();
    let ui = ui::TerminalUi::new();

    let restore_config = RestoreConfig {
        app_name: APP_NAME.to_string(),
        host_role: args.host_role.into(),
        source: build_source_config(args.local_dir.clone(), args.secondary_dir.clone(), args.cloud_remote.clone()),
        remote_list_timeout: std::time::Duration::from_secs(30),
        confirm_countdown: std::time::Duration::from_secs(20),
        rollback_countdown: std::time::Duration::from_secs(90),
        run_repairs: args.run_repairs,
        dry_run: args.dry_run,
    };

    match proxsave_restore::run_restore_workflow(
        &ctx,
        &restore_config,
        &clock,
        runner.as_ref(),
        &ui,
        &args.categories,
        args.cluster_safe_mode,
        args.extract_only.as_deref(),
    )
    .await
    {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
            println!("restore complete");
            Ok(())
        }
        Err(e) => {
            eprintln!("restore failed: {e}");
            std::process::exit(e.phase.exit_code());
        }
    }
}

fn run_config(args: ConfigInspectArgs) -> anyhow::Result<()> {
    let backup_config = args
        .backup
        .clone()
        .into_backup_config(APP_NAME, hostname(), env!("CARGO_PKG_VERSION").to_string(), "unknown".to_string());

    if args.json {
        let value = serde_json::json!({
            "app_name": backup_config.app_name,
            "backup_dir": backup_config.backup_dir,
            "log_dir": backup_config.log_dir,
            "host_role": backup_config.host_role.as_str(),
            "mode": format!("{:?}", backup_config.mode),
            "categories": backup_config.categories,
            "compression": format!("{:?}", backup_config.compression),
            "compression_level": backup_config.compression_level,
            "compression_threads": backup_config.compression_threads,
            "recipients": backup_config.recipients,
            "retention": {
                "kind": format!("{:?}", backup_config.retention.kind),
                "max_backups": backup_config.retention.max_backups,
                "max_age_days": backup_config.retention.max_age_days,
            },
            "dry_run": backup_config.dry_run,
            "cluster_mode": backup_config.cluster_mode,
            "hostname": backup_config.hostname,
        });
        println!("{}", serde_json::to_string_pretty(&value).context("serializing config")?);
    } else {
        println!("app_name: {}", backup_config.app_name);
        println!("host_role: {}", backup_config.host_role.as_str());
        println!("mode: {:?}", backup_config.mode);
        println!("backup_dir: {}", backup_config.backup_dir.display());
        println!("log_dir: {}", backup_config.log_dir.display());
        println!("compression: {:?} (level {}, threads {})", backup_config.compression, backup_config.compression_level, backup_config.compression_threads);
        println!("encryption_enabled: {}", backup_config.encryption_enabled());
        println!("retention: {:?}", backup_config.retention);
        println!("dry_run: {}", backup_config.dry_run);
        println!("cluster_mode: {}", backup_config.cluster_mode);
        println!("hostname: {}", backup_config.hostname);
    }
    Ok(())
}
