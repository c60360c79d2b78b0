//! Scheduled cleanup jobs.
//!
//! - Daily at 00:00 UTC: delete accounts that were never verified and purge expired
//!   passcodes and verification tokens.
//! - Weekly, Sunday 00:00 UTC: delete every stored label file and archive.
//!
//! A failed run is logged and retried at the next scheduled time.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeDelta, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{
    AppState,
    config::TokenConfig,
    db::Database,
    labels::storage::{LabelStorage, SweepReport},
};

/// Rows removed by one daily run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyReport {
    pub users_deleted: u64,
    pub otps_deleted: u64,
    pub verification_tokens_deleted: u64,
}

/// The next midnight UTC strictly after `now`
pub fn next_daily_run(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Days::new(1)).and_time(NaiveTime::MIN).and_utc()
}

/// The next Sunday midnight UTC strictly after `now`
pub fn next_weekly_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_ahead = 7 - u64::from(now.weekday().num_days_from_sunday());
    (now.date_naive() + Days::new(days_ahead)).and_time(NaiveTime::MIN).and_utc()
}

fn cutoff(now: DateTime<Utc>, ttl: Duration) -> anyhow::Result<DateTime<Utc>> {
    Ok(now - TimeDelta::from_std(ttl)?)
}

#[instrument(skip_all, err)]
pub async fn run_daily_cleanup(db: &dyn Database, tokens: &TokenConfig, now: DateTime<Utc>) -> anyhow::Result<DailyReport> {
    let users_deleted = db.delete_unverified_users_before(cutoff(now, tokens.unverified_user_ttl)?).await?;
    let otps_deleted = db.delete_expired_otps(cutoff(now, tokens.otp_ttl)?).await?;
    let verification_tokens_deleted = db
        .delete_expired_verification_tokens(cutoff(now, tokens.verification_ttl)?)
        .await?;

    Ok(DailyReport {
        users_deleted,
        otps_deleted,
        verification_tokens_deleted,
    })
}

#[instrument(skip_all, fields(root = %storage.root().display()), err)]
pub async fn run_label_sweep(storage: &LabelStorage) -> anyhow::Result<SweepReport> {
    Ok(storage.sweep().await?)
}

/// Sleep until `at`, returning false if shutdown was requested first
async fn wait_until(at: DateTime<Utc>, shutdown: &CancellationToken) -> bool {
    let delay = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn daily_loop(db: Arc<dyn Database>, tokens: TokenConfig, shutdown: CancellationToken) {
    loop {
        let next = next_daily_run(Utc::now());
        info!(%next, "Next daily cleanup scheduled");
        if !wait_until(next, &shutdown).await {
            info!("Daily cleanup stopped");
            return;
        }

        match run_daily_cleanup(db.as_ref(), &tokens, Utc::now()).await {
            Ok(report) => info!(
                users = report.users_deleted,
                otps = report.otps_deleted,
                verification_tokens = report.verification_tokens_deleted,
                "Daily cleanup finished"
            ),
            Err(e) => error!("Daily cleanup failed: {:#}", e),
        }
    }
}

async fn weekly_loop(storage: LabelStorage, shutdown: CancellationToken) {
    loop {
        let next = next_weekly_run(Utc::now());
        info!(%next, "Next label sweep scheduled");
        if !wait_until(next, &shutdown).await {
            info!("Label sweep stopped");
            return;
        }

        match run_label_sweep(&storage).await {
            Ok(report) => info!(
                files = report.files_deleted,
                dirs = report.dirs_removed,
                "Label sweep finished"
            ),
            Err(e) => error!("Label sweep failed: {:#}", e),
        }
    }
}

/// Start the cleanup loops enabled in the configuration
pub fn spawn(state: &AppState, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let cleanup = &state.config.background_services.cleanup;
    if !cleanup.enabled {
        info!("Cleanup jobs disabled by configuration");
        return Vec::new();
    }

    let mut handles = vec![tokio::spawn(daily_loop(
        state.db.clone(),
        state.config.tokens.clone(),
        shutdown.clone(),
    ))];
    if cleanup.label_sweep_enabled {
        handles.push(tokio::spawn(weekly_loop(state.storage.clone(), shutdown)));
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDatabase, models::users::UserCreateDBRequest};
    use crate::test_utils::{create_test_config, harness};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_next_daily_run() {
        assert_eq!(next_daily_run(at("2024-05-08T13:45:00Z")), at("2024-05-09T00:00:00Z"));
        assert_eq!(next_daily_run(at("2024-12-31T23:59:59Z")), at("2025-01-01T00:00:00Z"));
        assert_eq!(next_daily_run(at("2024-05-08T00:00:00Z")), at("2024-05-09T00:00:00Z"));
    }

    #[test]
    fn test_next_weekly_run_is_sunday_midnight() {
        // 2024-05-08 is a Wednesday
        assert_eq!(next_weekly_run(at("2024-05-08T10:00:00Z")), at("2024-05-12T00:00:00Z"));
        assert_eq!(next_weekly_run(at("2024-05-11T23:00:00Z")), at("2024-05-12T00:00:00Z"));
        // From a Sunday the next run is a week away
        assert_eq!(next_weekly_run(at("2024-05-12T00:00:00Z")), at("2024-05-19T00:00:00Z"));
        assert_eq!(next_weekly_run(at("2024-05-12T08:00:00Z")), at("2024-05-19T00:00:00Z"));
    }

    async fn user(db: &MemoryDatabase, name: &str) -> crate::db::models::users::UserDBResponse {
        db.create_user(&UserCreateDBRequest {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "x".to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_daily_cleanup_removes_only_expired_records() {
        let db = MemoryDatabase::new();
        let tokens = TokenConfig::default();
        let now = Utc::now();

        let stale = user(&db, "stale").await;
        db.set_user_created_at(stale.id, now - TimeDelta::days(2)).await.unwrap();
        let fresh = user(&db, "fresh").await;
        let verified = user(&db, "verified").await;
        db.mark_user_verified(verified.id).await.unwrap();
        db.set_user_created_at(verified.id, now - TimeDelta::days(30)).await.unwrap();

        db.replace_otp("old@example.com", "1234").await.unwrap();
        db.set_otp_created_at("old@example.com", now - TimeDelta::minutes(10)).await.unwrap();
        db.replace_otp("new@example.com", "5678").await.unwrap();

        db.replace_verification_token(fresh.id, "hash").await.unwrap();
        db.set_verification_token_created_at(fresh.id, now - TimeDelta::hours(1))
            .await
            .unwrap();

        let report = run_daily_cleanup(&db, &tokens, now).await.unwrap();
        assert_eq!(
            report,
            DailyReport {
                users_deleted: 1,
                otps_deleted: 1,
                verification_tokens_deleted: 1,
            }
        );

        assert!(db.get_user_by_id(stale.id).await.unwrap().is_none());
        assert!(db.get_user_by_id(fresh.id).await.unwrap().is_some());
        assert!(db.get_user_by_id(verified.id).await.unwrap().is_some());
        assert!(db.get_otp("new@example.com").await.unwrap().is_some());
        assert!(db.get_verification_token(fresh.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_label_sweep_empties_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LabelStorage::new(dir.path());
        storage.store_label("a@example.com", "T1", b"pdf").await.unwrap();
        storage.store_label("b@example.com", "T2", b"pdf").await.unwrap();

        let report = run_label_sweep(&storage).await.unwrap();
        assert_eq!(report.files_deleted, 2);
        assert!(storage.sweep().await.unwrap().files_deleted == 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_loops_stop_on_shutdown() {
        let h = harness(create_test_config()).await;
        let shutdown = CancellationToken::new();
        let handles = spawn(&h.state, shutdown.clone());
        assert_eq!(handles.len(), 2);

        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_disabled_cleanup_spawns_nothing() {
        let mut config = create_test_config();
        config.background_services.cleanup.enabled = false;
        let h = harness(config).await;
        assert!(spawn(&h.state, CancellationToken::new()).is_empty());

        let mut config = create_test_config();
        config.background_services.cleanup.label_sweep_enabled = false;
        let h = harness(config).await;
        let handles = spawn(&h.state, CancellationToken::new());
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.abort();
        }
    }
}
