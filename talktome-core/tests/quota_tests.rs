// File: talktome-core/tests/quota_tests.rs

use std::sync::Arc;

use chrono::{Duration, Utc};

use talktome_common::models::ChannelId;
use talktome_common::traits::QuotaLedger;
use talktome_core::Error;
use talktome_core::quota::{QuotaEngine, QuotaPolicy};
use talktome_core::repositories::InMemoryQuotaLedger;
use talktome_core::tasks::usage_retention::run_usage_prune;

fn channel(raw: u64) -> ChannelId {
    ChannelId::new(raw).unwrap()
}

fn engine_with(default_limit: i64) -> (Arc<InMemoryQuotaLedger>, QuotaEngine) {
    let ledger = Arc::new(InMemoryQuotaLedger::new());
    let engine = QuotaEngine::new(ledger.clone(), QuotaPolicy::new(default_limit));
    (ledger, engine)
}

#[tokio::test]
async fn test_usage_only_counts_records_inside_window() -> Result<(), Error> {
    let (ledger, engine) = engine_with(1000);
    let now = Utc::now();
    let ch = channel(5);

    ledger.append(ch, 100, now - Duration::hours(25)).await?;
    ledger.append(ch, 50, now - Duration::hours(1)).await?;
    ledger.append(channel(6), 70, now - Duration::hours(1)).await?;

    assert_eq!(engine.usage_in_window(ch, now, Duration::hours(24)).await?, 50);
    Ok(())
}

#[tokio::test]
async fn test_record_exactly_at_window_start_is_excluded() -> Result<(), Error> {
    let (ledger, engine) = engine_with(1000);
    let now = Utc::now();
    let ch = channel(5);

    ledger.append(ch, 30, now - Duration::hours(24)).await?;
    assert_eq!(engine.usage_in_window(ch, now, Duration::hours(24)).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_override_takes_precedence_until_deleted() -> Result<(), Error> {
    let (_, engine) = engine_with(1000);
    let ch = channel(5);

    assert_eq!(engine.effective_limit(ch, 1000).await?, 1000);
    engine.set_override_limit(ch, 500).await?;
    assert_eq!(engine.effective_limit(ch, 1000).await?, 500);

    assert!(engine.delete_override_limit(ch).await?);
    assert_eq!(engine.effective_limit(ch, 1000).await?, 1000);
    Ok(())
}

#[tokio::test]
async fn test_zero_override_falls_back_to_default() -> Result<(), Error> {
    let (_, engine) = engine_with(1000);
    let ch = channel(5);

    engine.set_override_limit(ch, 0).await?;
    assert_eq!(engine.effective_limit(ch, 1000).await?, 1000);
    Ok(())
}

#[tokio::test]
async fn test_exceeded_boundary() -> Result<(), Error> {
    let (ledger, engine) = engine_with(100);
    let now = Utc::now();
    let window = Duration::hours(24);

    ledger.append(channel(1), 99, now - Duration::minutes(5)).await?;
    assert!(!engine.is_exceeded(channel(1), now, window, 100).await?);

    ledger.append(channel(2), 100, now - Duration::minutes(5)).await?;
    assert!(engine.is_exceeded(channel(2), now, window, 100).await?);

    let status = engine.status(channel(2), now).await?;
    assert_eq!(status.used, 100);
    assert_eq!(status.limit, 100);
    assert!(status.exceeded);
    Ok(())
}

#[tokio::test]
async fn test_zero_token_usage_is_recorded() -> Result<(), Error> {
    let (_, engine) = engine_with(100);
    let ch = channel(1);

    engine.record_usage(ch, 0, Utc::now()).await?;
    assert_eq!(engine.usage_records(ch).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_negative_values_are_rejected_before_mutation() -> Result<(), Error> {
    let (_, engine) = engine_with(100);
    let ch = channel(1);

    assert!(matches!(engine.record_usage(ch, -3, Utc::now()).await, Err(Error::Validation(_))));
    assert!(matches!(engine.set_override_limit(ch, -1).await, Err(Error::Validation(_))));
    assert!(engine.usage_records(ch).await?.is_empty());
    assert_eq!(engine.effective_limit(ch, 100).await?, 100);
    Ok(())
}

#[tokio::test]
async fn test_prune_removes_only_strictly_older_records() -> Result<(), Error> {
    let (ledger, engine) = engine_with(100);
    let cutoff = Utc::now() - Duration::hours(24);

    ledger.append(channel(1), 10, cutoff - Duration::seconds(1)).await?;
    ledger.append(channel(2), 20, cutoff - Duration::hours(3)).await?;
    ledger.append(channel(1), 30, cutoff).await?;
    ledger.append(channel(1), 40, cutoff + Duration::hours(1)).await?;

    assert_eq!(engine.prune_older_than(cutoff).await?, 2);
    assert_eq!(engine.prune_older_than(cutoff).await?, 0);

    let left: Vec<i64> = engine.usage_records(channel(1)).await?.iter().map(|r| r.tokens).collect();
    assert_eq!(left, vec![40, 30]);
    Ok(())
}

#[tokio::test]
async fn test_run_usage_prune_uses_policy_window() -> Result<(), Error> {
    let ledger = Arc::new(InMemoryQuotaLedger::new());
    let policy = QuotaPolicy::new(100).with_window(Duration::hours(2));
    let engine = QuotaEngine::new(ledger.clone(), policy);
    let now = Utc::now();

    ledger.append(channel(1), 10, now - Duration::hours(3)).await?;
    ledger.append(channel(1), 20, now - Duration::hours(1)).await?;

    assert_eq!(run_usage_prune(&engine, now).await?, 1);
    assert_eq!(engine.usage_in_window(channel(1), now, Duration::hours(24)).await?, 20);
    Ok(())
}

#[tokio::test]
async fn test_reset_usage_only_touches_one_channel() -> Result<(), Error> {
    let (ledger, engine) = engine_with(100);
    let now = Utc::now();

    ledger.append(channel(1), 10, now).await?;
    ledger.append(channel(1), 15, now).await?;
    ledger.append(channel(2), 20, now).await?;

    assert_eq!(engine.reset_usage(channel(1)).await?, 2);
    let later = now + Duration::seconds(1);
    let day = Duration::hours(24);
    assert_eq!(engine.usage_in_window(channel(1), later, day).await?, 0);
    assert_eq!(engine.usage_in_window(channel(2), later, day).await?, 20);
    Ok(())
}
