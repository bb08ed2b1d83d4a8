//! Command implementations for tickd.
//!
//! Handles:
//! - run: Load config, register built-in jobs, run the scheduler
//! - jobs: Print built-in jobs with their enablement
//! - stop: SIGTERM the process named in the PID file
//! - status: Report what the PID file says

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tickd_scheduler::Scheduler;

use crate::jobs::{register_builtin_jobs, BUILTIN_JOBS};
use crate::settings::{load_config, Settings, TaskLists};

/// Where the running daemon records its process id.
struct PidFile {
    path: PathBuf,
}

/// What the PID file says about the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonStatus {
    Running(u32),
    /// PID file names a process that no longer exists
    Stale(u32),
    Stopped,
}

impl PidFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$XDG_RUNTIME_DIR/tickd/tickd.pid`, else the cache dir.
    fn default_location() -> Self {
        let base = directories::BaseDirs::new()
            .map(|dirs| {
                #[cfg(unix)]
                let dir = dirs.runtime_dir().unwrap_or_else(|| dirs.cache_dir());
                #[cfg(not(unix))]
                let dir = dirs.cache_dir();
                dir.to_path_buf()
            })
            .unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("tickd").join("tickd.pid"))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        fs::write(&self.path, std::process::id().to_string())
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!(path = %self.path.display(), "PID recorded");
        Ok(())
    }

    fn read(&self) -> Option<u32> {
        let raw = fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "PID file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove PID file"),
        }
    }

    fn status(&self) -> DaemonStatus {
        match self.read() {
            Some(pid) if process_alive(pid) => DaemonStatus::Running(pid),
            Some(pid) => DaemonStatus::Stale(pid),
            None => DaemonStatus::Stopped,
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Signal 0 checks existence without signalling
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
        anyhow::bail!("Could not signal tickd (PID {})", pid);
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    anyhow::bail!("tickd stop is only supported on Unix")
}

/// Resolve settings with CLI overrides applied on top.
fn resolve_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    debug: bool,
) -> Result<(config::Config, Settings)> {
    let config = load_config(config_path).context("Failed to load configuration")?;
    let mut settings = Settings::from_config(&config).context("Invalid configuration")?;

    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    if debug {
        settings.scheduler.debug = true;
    }

    Ok((config, settings))
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.context("Failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
    Ok(())
}

/// Run the scheduler in the foreground.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Register built-in jobs
/// 3. Start the scheduler
/// 4. Shut down gracefully on SIGINT/SIGTERM
pub async fn run_daemon(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    debug: bool,
) -> Result<()> {
    let (config, settings) = resolve_settings(config_path, log_level_override, debug)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!(
        log_level = %settings.log_level,
        queue_capacity = settings.scheduler.queue_capacity,
        retry_cooldown_secs = settings.scheduler.retry_cooldown_secs,
        debug = settings.scheduler.debug,
        "tickd starting"
    );
    if settings.scheduler.debug {
        warn!("Debug mode: job panics are not isolated and failures are not retried");
    }

    let scheduler = Scheduler::with_settings(settings.scheduler.clone(), Arc::new(config))
        .context("Failed to create scheduler")?;
    register_builtin_jobs(&scheduler, &settings.jobs);

    let pid_file = PidFile::default_location();
    pid_file.record()?;

    let ctx = CancellationToken::new();
    if let Err(e) = scheduler.start(&ctx) {
        pid_file.clear();
        return Err(anyhow::Error::new(e).context("Failed to start scheduler"));
    }

    let signal_result = shutdown_signal().await;

    scheduler
        .shutdown()
        .await
        .context("Failed to shut down scheduler")?;
    pid_file.clear();
    info!("tickd stopped");

    signal_result
}

/// Print every built-in job and whether it would run.
pub fn list_jobs(config_path: Option<&str>) -> Result<()> {
    let (config, settings) = resolve_settings(config_path, None, false)?;
    let scheduler = Scheduler::with_settings(settings.scheduler.clone(), Arc::new(config))
        .context("Failed to create scheduler")?;

    for line in job_table(&scheduler, &settings.tasks) {
        println!("{}", line);
    }
    Ok(())
}

/// Rows for `tickd jobs`: one per built-in job, then the configured lists.
fn job_table(scheduler: &Scheduler, tasks: &TaskLists) -> Vec<String> {
    let mut lines = vec![format!("{:<16} ENABLED", "JOB")];
    for name in BUILTIN_JOBS {
        let enabled = if scheduler.is_task_enabled(name) { "yes" } else { "no" };
        lines.push(format!("{:<16} {}", name, enabled));
    }

    let show = |list: &[String]| {
        if list.is_empty() {
            "(none)".to_string()
        } else {
            list.join(", ")
        }
    };
    lines.push(String::new());
    lines.push(format!("allow-list: {}", show(&tasks.enabled)));
    lines.push(format!("deny-list:  {}", show(&tasks.disabled)));
    lines
}

/// Ask the running daemon to shut down.
pub fn stop_daemon() -> Result<()> {
    let pid_file = PidFile::default_location();
    match pid_file.status() {
        DaemonStatus::Running(pid) => {
            send_terminate(pid)?;
            println!("Asked tickd (PID {}) to shut down", pid);
            Ok(())
        }
        DaemonStatus::Stale(pid) => {
            pid_file.clear();
            anyhow::bail!("tickd is not running (removed stale PID {})", pid)
        }
        DaemonStatus::Stopped => anyhow::bail!(
            "tickd is not running (no PID file at {})",
            pid_file.path().display()
        ),
    }
}

/// Report whether the daemon is running.
pub fn show_status() -> Result<()> {
    let pid_file = PidFile::default_location();
    let path = pid_file.path().display();
    match pid_file.status() {
        DaemonStatus::Running(pid) => println!("tickd: running (PID {}, {})", pid, path),
        DaemonStatus::Stale(pid) => println!("tickd: stopped (stale PID {} in {})", pid, path),
        DaemonStatus::Stopped => println!("tickd: stopped"),
    }
    Ok(())
}
