//! # L1 Auto-Fixer
//!
//! Registry of remediation handlers for the safe tier. Handlers are limited
//! to operations whose worst case is a no-op: transient-file cleanup, log
//! rotation, package-cache purge. Whatever a handler does, the fixer always
//! emits an `ActionReport`; handler errors become `failed` outcomes and
//! never escape.

use async_trait::async_trait;
use chrono::Utc;
use cortex_common::models::{ActionReport, ActionResult, IssueLevel, IssueReport};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::types::ProbeError;

/// Outcome reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    /// Remediation applied; detail line describes what changed.
    Fixed(String),
    /// Remediation could not be applied; reason explains why.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FixResult {
    pub action: String,
    pub outcome: FixOutcome,
}

#[async_trait]
pub trait FixHandler: Send + Sync {
    /// Name reported in the `ActionReport` when the handler errors out
    /// before producing a result.
    fn action_name(&self) -> &str;

    async fn fix(&self, issue: &IssueReport) -> Result<FixResult, ProbeError>;
}

pub struct AutoFixer {
    handlers: HashMap<String, Arc<dyn FixHandler>>,
}

impl Default for AutoFixer {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl AutoFixer {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry covering the built-in L1 issue types. L2 types are
    /// deliberately absent: those go through the decision path.
    pub fn with_default_handlers() -> Self {
        let mut fixer = Self::empty();
        fixer.register("disk_space_low", Arc::new(DiskSpaceHandler::default()));
        fixer.register("temp_files_cleanup", Arc::new(TempFilesHandler::default()));
        fixer.register("log_rotation_needed", Arc::new(LogRotationHandler::default()));
        fixer.register("cache_cleanup", Arc::new(PackageCacheHandler::default()));
        fixer
    }

    pub fn register(&mut self, issue_type: impl Into<String>, handler: Arc<dyn FixHandler>) {
        self.handlers.insert(issue_type.into(), handler);
    }

    /// Run the registered handler for the issue, if any. Every attempt
    /// produces an `ActionReport` with tier L1.
    pub async fn fix(&self, issue: &IssueReport) -> Option<ActionReport> {
        let handler = match self.handlers.get(&issue.kind) {
            Some(handler) => handler,
            None => {
                warn!("no fixer available for issue type: {}", issue.kind);
                return None;
            }
        };

        info!("attempting to fix {}: {}", issue.kind, issue.description);

        let report = match handler.fix(issue).await {
            Ok(result) => match result.outcome {
                FixOutcome::Fixed(details) => {
                    info!("fix succeeded for {}: {}", issue.kind, details);
                    ActionReport {
                        level: IssueLevel::L1,
                        action: result.action,
                        result: ActionResult::Success,
                        details,
                        timestamp: Utc::now(),
                    }
                }
                FixOutcome::Failed(reason) => {
                    warn!("fix failed for {}: {}", issue.kind, reason);
                    ActionReport {
                        level: IssueLevel::L1,
                        action: result.action,
                        result: ActionResult::Failed,
                        details: reason,
                        timestamp: Utc::now(),
                    }
                }
            },
            Err(err) => ActionReport {
                level: IssueLevel::L1,
                action: handler.action_name().to_string(),
                result: ActionResult::Failed,
                details: format!("handler error: {err}"),
                timestamp: Utc::now(),
            },
        };

        Some(report)
    }
}

/// Delete regular files under `root` whose modification time is older than
/// `max_age`. Unreadable entries are skipped. Returns bytes reclaimed.
fn cleanup_directory(root: &Path, max_age: Duration) -> u64 {
    if !root.exists() {
        return 0;
    }

    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut freed = 0u64;

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };

        if modified < cutoff && std::fs::remove_file(entry.path()).is_ok() {
            freed += meta.len();
        }
    }

    freed
}

fn gigabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Run an external command with a hard timeout, capturing its output.
async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<std::process::Output, ProbeError> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .output();

    tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ProbeError::Timeout(timeout.as_secs()))?
        .map_err(ProbeError::Io)
}

/// Frees disk by clearing old temp files and aged compressed logs.
pub struct DiskSpaceHandler {
    temp_dir: std::path::PathBuf,
    log_dir: std::path::PathBuf,
}

impl Default for DiskSpaceHandler {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp".into(),
            log_dir: "/var/log".into(),
        }
    }
}

#[async_trait]
impl FixHandler for DiskSpaceHandler {
    fn action_name(&self) -> &str {
        "cleaned_disk_space"
    }

    async fn fix(&self, _issue: &IssueReport) -> Result<FixResult, ProbeError> {
        let temp_dir = self.temp_dir.clone();
        let log_dir = self.log_dir.clone();

        let freed = tokio::task::spawn_blocking(move || {
            let mut freed = cleanup_directory(&temp_dir, Duration::from_secs(7 * 24 * 3600));
            // Aged compressed logs only; live logs belong to logrotate
            if log_dir.exists() {
                let cutoff = SystemTime::now()
                    .checked_sub(Duration::from_secs(30 * 24 * 3600))
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                for entry in WalkDir::new(&log_dir).into_iter().filter_map(|e| e.ok()) {
                    let is_gz = entry
                        .path()
                        .extension()
                        .map(|ext| ext == "gz")
                        .unwrap_or(false);
                    if !entry.file_type().is_file() || !is_gz {
                        continue;
                    }
                    let Ok(meta) = entry.metadata() else { continue };
                    let Ok(modified) = meta.modified() else { continue };
                    if modified < cutoff && std::fs::remove_file(entry.path()).is_ok() {
                        freed += meta.len();
                    }
                }
            }
            freed
        })
        .await
        .map_err(|err| ProbeError::Fixer(err.to_string()))?;

        if freed > 0 {
            Ok(FixResult {
                action: self.action_name().to_string(),
                outcome: FixOutcome::Fixed(format!(
                    "Cleaned temp files and old logs, freed {:.2} GB",
                    gigabytes(freed)
                )),
            })
        } else {
            Ok(FixResult {
                action: self.action_name().to_string(),
                outcome: FixOutcome::Failed("No space could be freed".to_string()),
            })
        }
    }
}

/// Clears temp files older than three days.
pub struct TempFilesHandler {
    temp_dir: std::path::PathBuf,
}

impl Default for TempFilesHandler {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp".into(),
        }
    }
}

impl TempFilesHandler {
    pub fn with_dir(temp_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }
}

#[async_trait]
impl FixHandler for TempFilesHandler {
    fn action_name(&self) -> &str {
        "cleaned_temp_files"
    }

    async fn fix(&self, _issue: &IssueReport) -> Result<FixResult, ProbeError> {
        let dir = self.temp_dir.clone();
        let freed =
            tokio::task::spawn_blocking(move || cleanup_directory(&dir, Duration::from_secs(3 * 24 * 3600)))
                .await
                .map_err(|err| ProbeError::Fixer(err.to_string()))?;

        Ok(FixResult {
            action: self.action_name().to_string(),
            outcome: FixOutcome::Fixed(format!(
                "Cleaned temp files, freed {:.2} GB",
                gigabytes(freed)
            )),
        })
    }
}

/// Forces a logrotate pass when the binary is available.
#[derive(Default)]
pub struct LogRotationHandler;

#[async_trait]
impl FixHandler for LogRotationHandler {
    fn action_name(&self) -> &str {
        "log_rotation"
    }

    async fn fix(&self, _issue: &IssueReport) -> Result<FixResult, ProbeError> {
        let output = match run_command(
            "logrotate",
            &["-f", "/etc/logrotate.conf"],
            Duration::from_secs(30),
        )
        .await
        {
            Ok(output) => output,
            Err(ProbeError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FixResult {
                    action: self.action_name().to_string(),
                    outcome: FixOutcome::Failed("logrotate command not found".to_string()),
                });
            }
            Err(err) => return Err(err),
        };

        if output.status.success() {
            Ok(FixResult {
                action: self.action_name().to_string(),
                outcome: FixOutcome::Fixed("Logrotate executed successfully".to_string()),
            })
        } else {
            Ok(FixResult {
                action: self.action_name().to_string(),
                outcome: FixOutcome::Failed(format!(
                    "Logrotate failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
            })
        }
    }
}

/// Purges the distribution package cache (apt or yum, whichever exists).
#[derive(Default)]
pub struct PackageCacheHandler;

#[async_trait]
impl FixHandler for PackageCacheHandler {
    fn action_name(&self) -> &str {
        "cache_cleanup"
    }

    async fn fix(&self, _issue: &IssueReport) -> Result<FixResult, ProbeError> {
        let mut cleaned = Vec::new();

        if Path::new("/var/cache/apt").exists() {
            match run_command("apt-get", &["clean"], Duration::from_secs(60)).await {
                Ok(output) if output.status.success() => cleaned.push("apt"),
                Ok(_) | Err(_) => warn!("failed to clean apt cache"),
            }
        }

        if Path::new("/var/cache/yum").exists() {
            match run_command("yum", &["clean", "all"], Duration::from_secs(60)).await {
                Ok(output) if output.status.success() => cleaned.push("yum"),
                Ok(_) | Err(_) => warn!("failed to clean yum cache"),
            }
        }

        let details = if cleaned.is_empty() {
            "Cache cleanup completed (no package cache found)".to_string()
        } else {
            format!("Cleaned package cache: {}", cleaned.join(", "))
        };

        Ok(FixResult {
            action: self.action_name().to_string(),
            outcome: FixOutcome::Fixed(details),
        })
    }
}
