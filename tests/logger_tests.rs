use anyhow::Result;
use chrono::{NaiveDate, TimeDelta, Utc};
use notification_pipeline::{
    models::{
        health::HealthStatus,
        notification::{LogFilter, NotificationLog},
        status::{NotificationStatus, NotificationType},
    },
    pipeline::logger::{NotificationLogger, PersistOutcome},
};

use crate::common::log_entry;

/// Test: Success rate counts only sent and failed entries
#[tokio::test]
async fn test_daily_stats_success_rate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 100);
    let now = Utc::now();

    for _ in 0..3 {
        logger
            .log_notification(log_entry(NotificationStatus::Sent, now))
            .await;
    }
    logger
        .log_notification(
            log_entry(NotificationStatus::Failed, now).with_error("smtp timeout"),
        )
        .await;
    logger
        .log_notification(log_entry(NotificationStatus::Pending, now))
        .await;

    let stats = logger.generate_daily_stats(now.date_naive());

    assert_eq!(stats.total_sent, 3);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(stats.success_rate, 75.0);
    assert_eq!(stats.by_type["email"].sent, 3);
    assert_eq!(stats.by_template["order-confirmation"].failed, 1);

    Ok(())
}

/// Test: A day with no entries reports a zero success rate
#[tokio::test]
async fn test_empty_day_stats() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);

    let stats = logger.generate_daily_stats(Utc::now().date_naive());

    assert_eq!(stats.total_sent, 0);
    assert_eq!(stats.success_rate, 0.0);
    assert!(stats.by_type.is_empty());

    Ok(())
}

/// Test: The buffer evicts the oldest entries once full
#[tokio::test]
async fn test_ring_buffer_eviction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 3);
    let start = Utc::now() - TimeDelta::minutes(10);

    for i in 0..5 {
        let log = log_entry(NotificationStatus::Sent, start + TimeDelta::minutes(i))
            .with_user_id(format!("user-{}", i));
        logger.log_notification(log).await;
    }

    assert_eq!(logger.total_in_memory(), 3);

    let users: Vec<_> = logger
        .get_recent_logs(10)
        .into_iter()
        .filter_map(|log| log.user_id)
        .collect();
    assert_eq!(users, vec!["user-4", "user-3", "user-2"]);

    Ok(())
}

/// Test: Results come back newest first even when recorded out of order
#[tokio::test]
async fn test_filtered_logs_most_recent_first() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);
    let now = Utc::now();

    logger
        .log_notification(log_entry(NotificationStatus::Sent, now - TimeDelta::minutes(5)).with_user_id("middle"))
        .await;
    logger
        .log_notification(log_entry(NotificationStatus::Sent, now).with_user_id("newest"))
        .await;
    logger
        .log_notification(log_entry(NotificationStatus::Failed, now - TimeDelta::minutes(9)).with_user_id("oldest"))
        .await;

    let users: Vec<_> = logger
        .get_recent_logs(10)
        .into_iter()
        .filter_map(|log| log.user_id)
        .collect();
    assert_eq!(users, vec!["newest", "middle", "oldest"]);

    let failed = logger.get_filtered_logs(
        &LogFilter {
            status: Some(NotificationStatus::Failed),
            ..LogFilter::default()
        },
        None,
    );
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].user_id.as_deref(), Some("oldest"));

    let windowed = logger.get_filtered_logs(
        &LogFilter {
            start_date: Some(now - TimeDelta::minutes(6)),
            end_date: Some(now - TimeDelta::minutes(1)),
            ..LogFilter::default()
        },
        Some(5),
    );
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].user_id.as_deref(), Some("middle"));

    Ok(())
}

/// Test: Entries are appended to the day file, failures also to the error file
#[tokio::test]
async fn test_entries_written_to_day_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path().join("nested"), 10);
    let now = Utc::now();

    let sent = logger
        .log_notification(log_entry(NotificationStatus::Sent, now))
        .await;
    let failed = logger
        .log_notification(log_entry(NotificationStatus::Failed, now).with_error("bounced"))
        .await;
    assert!(sent.is_persisted());
    assert!(failed.is_persisted());

    let today = Utc::now().date_naive();
    let contents = tokio::fs::read_to_string(logger.log_path(today)).await?;
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<Vec<serde_json::Value>, _>>()?;

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["eventId"], "evt-1");
    assert_eq!(lines[0]["status"], "sent");
    assert!(lines[0]["timestamp"].is_string());
    assert_eq!(lines[1]["error"], "bounced");

    let errors = tokio::fs::read_to_string(logger.error_log_path(today)).await?;
    assert_eq!(errors.lines().count(), 1);

    let parsed: NotificationLog = serde_json::from_str(errors.trim_end())?;
    assert_eq!(parsed.status, NotificationStatus::Failed);

    Ok(())
}

/// Test: An unwritable log directory keeps the entry in memory
#[tokio::test]
async fn test_unwritable_dir_keeps_memory_copy() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "occupied")?;

    let logger = NotificationLogger::new(&blocker, 10);
    let outcome = logger
        .log_notification(log_entry(NotificationStatus::Sent, Utc::now()))
        .await;

    assert!(matches!(outcome, PersistOutcome::MemoryOnly(_)));
    assert_eq!(logger.total_in_memory(), 1);

    Ok(())
}

/// Test: Health turns unhealthy once more than half the sample failed
#[tokio::test]
async fn test_health_threshold() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 100);
    let now = Utc::now();

    let empty = logger.get_health_status();
    assert_eq!(empty.status, HealthStatus::Healthy);
    assert_eq!(empty.error_rate, 0.0);

    for status in [NotificationStatus::Sent, NotificationStatus::Failed] {
        logger.log_notification(log_entry(status, now)).await;
    }
    let even = logger.get_health_status();
    assert_eq!(even.error_rate, 50.0);
    assert_eq!(even.status, HealthStatus::Healthy);

    logger
        .log_notification(log_entry(NotificationStatus::Failed, now))
        .await;
    let failing = logger.get_health_status();
    assert_eq!(failing.status, HealthStatus::Unhealthy);
    assert_eq!(failing.sample_size, 3);
    assert_eq!(failing.error_rate, 66.67);

    Ok(())
}

/// Test: Real-time stats split the last hour from the last day
#[tokio::test]
async fn test_real_time_windows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 100);
    let now = Utc::now();

    logger
        .log_notification(log_entry(NotificationStatus::Sent, now - TimeDelta::minutes(10)))
        .await;
    logger
        .log_notification(
            log_entry(NotificationStatus::Failed, now - TimeDelta::hours(3)).with_error("bounced"),
        )
        .await;
    logger
        .log_notification(log_entry(NotificationStatus::Sent, now - TimeDelta::hours(30)))
        .await;

    let stats = logger.real_time_stats_at(now);

    assert_eq!(stats.last_hour.sent, 1);
    assert_eq!(stats.last_hour.failed, 0);
    assert_eq!(stats.last_hour.success_rate, 100.0);
    assert_eq!(stats.last24_hours.total_sent, 1);
    assert_eq!(stats.last24_hours.total_failed, 1);
    assert_eq!(stats.recent_failures.len(), 1);

    Ok(())
}

/// Test: Recent failures use the same newest-first order as log queries
#[tokio::test]
async fn test_recent_failures_ordered_by_sent_at() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 100);
    let now = Utc::now();

    // Recorded newest first, so insertion order is the reverse of time order.
    for minutes in 0..12 {
        logger
            .log_notification(
                log_entry(NotificationStatus::Failed, now - TimeDelta::minutes(minutes))
                    .with_user_id(format!("user-{}", minutes)),
            )
            .await;
    }

    let stats = logger.real_time_stats_at(now);
    let queried = logger.get_filtered_logs(
        &LogFilter {
            status: Some(NotificationStatus::Failed),
            ..LogFilter::default()
        },
        Some(10),
    );

    let users = |logs: &[NotificationLog]| -> Vec<Option<String>> {
        logs.iter().map(|log| log.user_id.clone()).collect()
    };
    assert_eq!(stats.recent_failures.len(), 10);
    assert_eq!(users(&stats.recent_failures), users(&queried));
    assert_eq!(stats.recent_failures[0].user_id.as_deref(), Some("user-0"));
    assert_eq!(stats.recent_failures[9].user_id.as_deref(), Some("user-9"));

    Ok(())
}

/// Test: Period stats produce one entry per calendar day inclusive
#[tokio::test]
async fn test_period_stats_day_count() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);

    let start = NaiveDate::from_ymd_opt(2024, 1, 30).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 2, 2).unwrap();
    let days = logger.generate_period_stats(start, end);

    assert_eq!(days.len(), 4);
    assert_eq!(days[0].date, start);
    assert_eq!(days[3].date, end);

    Ok(())
}

/// Test: Frequencies rank event types and errors by count
#[tokio::test]
async fn test_most_frequent_events_and_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);
    let now = Utc::now();

    for _ in 0..2 {
        logger
            .log_notification(log_entry(NotificationStatus::Failed, now).with_error("bounced"))
            .await;
    }
    let welcome = NotificationLog::new(
        "evt-2",
        "UserRegistered",
        NotificationType::Email,
        "new@shop.test",
        "welcome",
        NotificationStatus::Failed,
    )
    .with_error("timeout");
    logger.log_notification(welcome).await;

    let events = logger.most_frequent_events(5);
    assert_eq!(events[0].event_type, "OrderCreated");
    assert_eq!(events[0].count, 2);

    let errors = logger.most_frequent_errors(1);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error, "bounced");

    Ok(())
}

/// Test: Clearing memory leaves the files on disk
#[tokio::test]
async fn test_clear_memory_keeps_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);

    logger
        .log_notification(log_entry(NotificationStatus::Sent, Utc::now()))
        .await;

    assert_eq!(logger.clear_memory(), 1);
    assert_eq!(logger.total_in_memory(), 0);
    assert!(logger.log_path(Utc::now().date_naive()).exists());

    Ok(())
}

/// Test: Cleanup removes only day files past the retention window
#[tokio::test]
async fn test_cleanup_old_logs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);
    let today = Utc::now().date_naive();

    let old = today - TimeDelta::days(40);
    let recent = today - TimeDelta::days(5);
    std::fs::write(logger.log_path(old), "{}\n")?;
    std::fs::write(logger.error_log_path(old), "{}\n")?;
    std::fs::write(logger.log_path(recent), "{}\n")?;
    std::fs::write(dir.path().join("unrelated.txt"), "keep")?;

    let removed = logger.cleanup_old_logs(30).await?;

    assert_eq!(removed, 2);
    assert!(!logger.log_path(old).exists());
    assert!(logger.log_path(recent).exists());
    assert!(dir.path().join("unrelated.txt").exists());

    Ok(())
}

/// Test: Backup copies every log file into a new directory
#[tokio::test]
async fn test_backup_logs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backups = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path(), 10);

    logger
        .log_notification(log_entry(NotificationStatus::Failed, Utc::now()).with_error("bounced"))
        .await;

    let target = logger.backup_logs(backups.path()).await?;

    let today = Utc::now().date_naive();
    let copied = std::fs::read_dir(&target)?.count();
    assert_eq!(copied, 2);
    assert!(target.join(logger.log_path(today).file_name().unwrap()).exists());

    Ok(())
}

/// Test: Cleanup of a missing directory is a no-op
#[tokio::test]
async fn test_cleanup_missing_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = NotificationLogger::new(dir.path().join("absent"), 10);

    assert_eq!(logger.cleanup_old_logs(7).await?, 0);

    Ok(())
}
