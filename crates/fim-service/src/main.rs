use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fim_core::{scan_with_config, Baseline, MonitorConfig, ReportSink};
use fim_service::audit_log::DEFAULT_MAX_BYTES;
use fim_service::{
    logging, AuditLog, ChainStatus, FanoutSink, FileWatcher, Notifications, TracingSink,
    WatchLoop, WatchMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "File integrity monitor", long_about = None)]
struct Cli {
    /// Path to config.json
    #[arg(long)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a baseline
    Baseline,
    /// Run a one-time scan
    Scan {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch for changes
    Watch {
        #[arg(long, value_enum, default_value_t = WatchMode::Both)]
        mode: WatchMode,
    },
    /// Inspect the audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand, Debug)]
enum AuditAction {
    /// Check the hash chain
    Verify,
    /// Print the most recent entries
    Tail {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MonitorConfig::load(&cli.config)?;
    logging::init(&config.log_file)?;

    match cli.command {
        Commands::Baseline => baseline_command(&config).await,
        Commands::Scan { json } => scan_command(&config, json).await,
        Commands::Watch { mode } => watch_command(config, mode).await,
        Commands::Audit { action } => audit_command(&config, action),
    }
}

fn open_audit_log(config: &MonitorConfig) -> Result<Option<Arc<AuditLog>>> {
    config
        .audit_log_file
        .as_ref()
        .map(|path| AuditLog::open(path, DEFAULT_MAX_BYTES).map(Arc::new))
        .transpose()
}

fn build_sink(config: &MonitorConfig) -> Result<Arc<dyn ReportSink>> {
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(audit) = open_audit_log(config)? {
        sink = sink.with(audit);
    }
    Ok(Arc::new(sink))
}

async fn baseline_command(config: &MonitorConfig) -> Result<()> {
    Baseline::ensure_writable(&config.baseline_file)?;
    let owned = config.clone();
    let outcome = tokio::task::spawn_blocking(move || Baseline::build_from_config(&owned)).await??;

    build_sink(config)?.warnings(&outcome.warnings);
    outcome.baseline.save(&config.baseline_file)?;
    info!(
        files = outcome.baseline.len(),
        warnings = outcome.warnings.len(),
        "Baseline saved to {}",
        config.baseline_file.display()
    );
    println!(
        "Baseline saved to {} ({} files, {} warnings)",
        config.baseline_file.display(),
        outcome.baseline.len(),
        outcome.warnings.len()
    );
    Ok(())
}

async fn scan_command(config: &MonitorConfig, json: bool) -> Result<()> {
    let baseline = Baseline::load(&config.baseline_file)?;
    baseline.ensure_algorithm(config.hash_algorithm)?;
    let sink = build_sink(config)?;

    let owned = config.clone();
    let outcome =
        tokio::task::spawn_blocking(move || scan_with_config(&baseline, &owned)).await??;

    sink.changes(&outcome.report.events);
    sink.warnings(&outcome.report.warnings);
    info!(
        "Scan complete. {} change(s) detected.",
        outcome.report.events.len()
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print!("{}", outcome.report);
    }
    Ok(())
}

async fn watch_command(config: MonitorConfig, mode: WatchMode) -> Result<()> {
    let baseline = Baseline::load(&config.baseline_file)?;
    let sink = build_sink(&config)?;

    // The watcher must outlive the loop; dropping it stops delivery.
    let (notifications, _watcher) = if mode == WatchMode::PollOnly {
        (Notifications::Unavailable("polling mode requested".into()), None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        match FileWatcher::start(&config.paths, tx) {
            Ok(watcher) => {
                info!(roots = watcher.watched().len(), "real-time notifications active");
                (Notifications::Available(rx), Some(watcher))
            }
            Err(e) => {
                warn!("Real-time notifications unavailable: {:#}", e);
                (Notifications::Unavailable(format!("{:#}", e)), None)
            }
        }
    };

    info!("Watching {} path(s). Press Ctrl+C to stop.", config.paths.len());
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    let final_baseline = WatchLoop::new(config, mode, sink)
        .run(baseline, notifications, shutdown)
        .await
        .context("watch loop failed")?;
    info!(entries = final_baseline.len(), "watch stopped");
    Ok(())
}

fn audit_command(config: &MonitorConfig, action: AuditAction) -> Result<()> {
    let audit = open_audit_log(config)?
        .context("audit_log_file is not set in the configuration")?;
    match action {
        AuditAction::Verify => match audit.verify()? {
            ChainStatus::Intact { entries } => {
                println!("Audit log intact: {} entries", entries);
                Ok(())
            }
            ChainStatus::Broken { file, seq, reason } => {
                anyhow::bail!(
                    "audit log chain broken in {} at seq {}: {}",
                    file.display(),
                    seq,
                    reason
                )
            }
        },
        AuditAction::Tail { limit } => {
            for entry in audit.read_recent(None, Some(limit))?.into_iter().rev() {
                println!("{}", serde_json::to_string(&entry)?);
            }
            Ok(())
        }
    }
}
