//! Notification attempt log.
//!
//! Every attempt lands in two places: a bounded in-memory ring buffer that
//! serves filtering and statistics, and append-only JSON-lines files
//! partitioned by day under the log directory. Failed attempts are also
//! appended to a parallel error-only file.
//!
//! Recording never fails from the caller's point of view. A file write error
//! is reported through tracing and returned as [`PersistOutcome::MemoryOnly`].

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error, info};

use crate::{
    config::Config,
    models::{
        error::LoggerError,
        health::{HealthStatus, LoggerHealth},
        notification::{LogFilter, NotificationLog},
        stats::{
            ErrorFrequency, EventFrequency, LogSummary, NotificationStats, OutcomeCounts,
            RealTimeStats, WindowSnapshot,
        },
        status::NotificationStatus,
    },
    utils::percentage,
};

pub const DEFAULT_BUFFER_SIZE: usize = 1000;
pub const HEALTH_SAMPLE_SIZE: usize = 100;
pub const MAX_HEALTHY_ERROR_RATE: f64 = 50.0;
pub const RECENT_FAILURES_LIMIT: usize = 10;

const LOG_FILE_PREFIX: &str = "notifications-";
const ERROR_FILE_PREFIX: &str = "notification-errors-";
const LOG_FILE_SUFFIX: &str = ".log";

#[derive(Debug)]
pub enum PersistOutcome {
    Persisted,
    MemoryOnly(LoggerError),
}

impl PersistOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, PersistOutcome::Persisted)
    }
}

#[derive(Serialize)]
struct FileLogLine<'a> {
    #[serde(flatten)]
    log: &'a NotificationLog,
    timestamp: DateTime<Utc>,
}

pub struct NotificationLogger {
    log_dir: PathBuf,
    capacity: usize,
    buffer: Mutex<VecDeque<NotificationLog>>,
}

impl NotificationLogger {
    pub fn new(log_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            log_dir: log_dir.into(),
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.log_dir(), config.log_buffer_size)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<NotificationLog>> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn log_notification(&self, log: NotificationLog) -> PersistOutcome {
        debug!(
            event_id = %log.event_id,
            template = %log.template,
            status = %log.status,
            "Recording notification attempt"
        );

        self.remember(log.clone());

        match self.persist(&log).await {
            Ok(()) => PersistOutcome::Persisted,
            Err(e) => {
                error!(
                    event_id = %log.event_id,
                    log_dir = %self.log_dir.display(),
                    error = %e,
                    "Failed to persist notification log"
                );
                PersistOutcome::MemoryOnly(e)
            }
        }
    }

    fn remember(&self, log: NotificationLog) {
        let mut buffer = self.lock();
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(log);
    }

    async fn persist(&self, log: &NotificationLog) -> Result<(), LoggerError> {
        let now = Utc::now();
        let mut line = serde_json::to_string(&FileLogLine {
            log,
            timestamp: now,
        })?;
        line.push('\n');

        fs::create_dir_all(&self.log_dir).await?;

        let date = now.date_naive();
        Self::append_line(&self.log_path(date), &line).await?;
        if log.is_failed() {
            Self::append_line(&self.error_log_path(date), &line).await?;
        }

        Ok(())
    }

    // One write per line keeps concurrent appends from interleaving.
    async fn append_line(path: &Path, line: &str) -> Result<(), LoggerError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!(
            "{}{}{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    pub fn error_log_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!(
            "{}{}{}",
            ERROR_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Logs matching `filter`, most recent first.
    ///
    /// Entries are ordered by `sent_at`. Ties keep reverse insertion order.
    pub fn get_filtered_logs(&self, filter: &LogFilter, limit: Option<usize>) -> Vec<NotificationLog> {
        let mut logs: Vec<NotificationLog> = self
            .lock()
            .iter()
            .rev()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();

        most_recent_first(&mut logs);

        if let Some(limit) = limit {
            logs.truncate(limit);
        }
        logs
    }

    pub fn get_recent_logs(&self, limit: usize) -> Vec<NotificationLog> {
        self.get_filtered_logs(&LogFilter::default(), Some(limit))
    }

    pub fn total_in_memory(&self) -> usize {
        self.lock().len()
    }

    /// Drops the in-memory buffer. Files on disk are untouched.
    pub fn clear_memory(&self) -> usize {
        let mut buffer = self.lock();
        let cleared = buffer.len();
        buffer.clear();
        cleared
    }

    pub fn generate_daily_stats(&self, date: NaiveDate) -> NotificationStats {
        let buffer = self.lock();
        compute_stats(
            date,
            buffer.iter().filter(|log| log.sent_at.date_naive() == date),
        )
    }

    /// One entry per calendar day in `start..=end`. Callers bound the range.
    pub fn generate_period_stats(&self, start: NaiveDate, end: NaiveDate) -> Vec<NotificationStats> {
        start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| self.generate_daily_stats(day))
            .collect()
    }

    pub fn get_real_time_stats(&self) -> RealTimeStats {
        self.real_time_stats_at(Utc::now())
    }

    pub fn real_time_stats_at(&self, now: DateTime<Utc>) -> RealTimeStats {
        let day_ago = now - TimeDelta::hours(24);
        let hour_ago = now - TimeDelta::hours(1);
        let buffer = self.lock();

        let in_window = |log: &&NotificationLog, since: DateTime<Utc>| {
            log.sent_at >= since && log.sent_at <= now
        };

        let last24_hours = compute_stats(
            now.date_naive(),
            buffer.iter().filter(|log| in_window(log, day_ago)),
        );

        let hour = compute_stats(
            now.date_naive(),
            buffer.iter().filter(|log| in_window(log, hour_ago)),
        );

        let mut recent_failures: Vec<NotificationLog> = buffer
            .iter()
            .rev()
            .filter(|log| log.is_failed() && in_window(log, day_ago))
            .cloned()
            .collect();
        most_recent_first(&mut recent_failures);
        recent_failures.truncate(RECENT_FAILURES_LIMIT);

        RealTimeStats {
            last24_hours,
            last_hour: WindowSnapshot {
                sent: hour.total_sent,
                failed: hour.total_failed,
                success_rate: hour.success_rate,
            },
            recent_failures,
        }
    }

    /// Healthy while at most half of the latest entries failed.
    pub fn get_health_status(&self) -> LoggerHealth {
        let buffer = self.lock();
        let sample_size = buffer.len().min(HEALTH_SAMPLE_SIZE);
        let failed = buffer
            .iter()
            .rev()
            .take(HEALTH_SAMPLE_SIZE)
            .filter(|log| log.is_failed())
            .count();

        let error_rate = percentage(failed as u64, sample_size as u64);

        LoggerHealth {
            status: if error_rate <= MAX_HEALTHY_ERROR_RATE {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            error_rate,
            sample_size,
            total_logs_in_memory: buffer.len(),
        }
    }

    pub fn most_frequent_events(&self, top: usize) -> Vec<EventFrequency> {
        let buffer = self.lock();
        top_counts(buffer.iter().map(|log| log.event_type.as_str()), top)
            .into_iter()
            .map(|(event_type, count)| EventFrequency { event_type, count })
            .collect()
    }

    pub fn most_frequent_errors(&self, top: usize) -> Vec<ErrorFrequency> {
        let buffer = self.lock();
        top_counts(buffer.iter().filter_map(|log| log.error.as_deref()), top)
            .into_iter()
            .map(|(error, count)| ErrorFrequency { error, count })
            .collect()
    }

    /// Deletes day files older than `days_to_keep` days. Returns how many were removed.
    pub async fn cleanup_old_logs(&self, days_to_keep: u32) -> Result<usize, LoggerError> {
        let cutoff = Utc::now().date_naive() - TimeDelta::days(i64::from(days_to_keep));
        let mut removed = 0;

        for (path, date) in self.log_files().await? {
            if date < cutoff {
                fs::remove_file(&path).await?;
                debug!(path = %path.display(), "Removed old notification log");
                removed += 1;
            }
        }

        info!(removed, days_to_keep, "Old notification logs cleaned up");

        Ok(removed)
    }

    /// Copies every log file into a fresh timestamped directory under `backup_root`.
    pub async fn backup_logs(&self, backup_root: impl AsRef<Path>) -> Result<PathBuf, LoggerError> {
        let target = backup_root
            .as_ref()
            .join(format!("backup-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        fs::create_dir_all(&target).await?;

        let mut copied = 0;
        for (path, _) in self.log_files().await? {
            if let Some(name) = path.file_name() {
                fs::copy(&path, target.join(name)).await?;
                copied += 1;
            }
        }

        info!(copied, target = %target.display(), "Notification logs backed up");

        Ok(target)
    }

    async fn log_files(&self) -> Result<Vec<(PathBuf, NaiveDate)>, LoggerError> {
        let mut entries = match fs::read_dir(&self.log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let date = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_log_file_date);
            if let Some(date) = date {
                files.push((path, date));
            }
        }
        Ok(files)
    }

    pub fn summarize(logs: &[NotificationLog]) -> LogSummary {
        logs.iter().fold(
            LogSummary {
                total_count: logs.len() as u64,
                ..LogSummary::default()
            },
            |mut summary, log| {
                match log.status {
                    NotificationStatus::Sent => summary.success_count += 1,
                    NotificationStatus::Failed => summary.failure_count += 1,
                    NotificationStatus::Retry => summary.retry_count += 1,
                    NotificationStatus::Pending => {}
                }
                summary
            },
        )
    }
}

fn parse_log_file_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_suffix(LOG_FILE_SUFFIX)?;
    let date = stem
        .strip_prefix(LOG_FILE_PREFIX)
        .or_else(|| stem.strip_prefix(ERROR_FILE_PREFIX))?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Stable sort by `sent_at`, newest first. Input is expected in reverse insertion order.
fn most_recent_first(logs: &mut [NotificationLog]) {
    logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
}

/// Sent/failed breakdown for `logs`. Pending and retry entries are not counted.
pub fn compute_stats<'a>(
    date: NaiveDate,
    logs: impl Iterator<Item = &'a NotificationLog>,
) -> NotificationStats {
    let mut stats = NotificationStats {
        date,
        total_sent: 0,
        total_failed: 0,
        success_rate: 0.0,
        by_type: Default::default(),
        by_template: Default::default(),
    };

    for log in logs {
        let bump = |counts: &mut OutcomeCounts| match log.status {
            NotificationStatus::Sent => counts.sent += 1,
            NotificationStatus::Failed => counts.failed += 1,
            _ => {}
        };

        match log.status {
            NotificationStatus::Sent => stats.total_sent += 1,
            NotificationStatus::Failed => stats.total_failed += 1,
            _ => continue,
        }

        bump(
            stats
                .by_type
                .entry(log.notification_type.as_str().to_string())
                .or_default(),
        );
        bump(stats.by_template.entry(log.template.clone()).or_default());
    }

    stats.success_rate = percentage(stats.total_sent, stats.total_sent + stats.total_failed);
    stats
}

fn top_counts<'a>(values: impl Iterator<Item = &'a str>, top: usize) -> Vec<(String, u64)> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }

    let mut ranked: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(value, count)| (value.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top);
    ranked
}
