// File: talktome-core/tests/cache_tests.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;

use talktome_common::models::{ChannelId, MessageId};
use talktome_common::traits::ModerationService;
use talktome_core::Error;
use talktome_core::cache::{AddOutcome, MessageCache};
use talktome_core::moderation::ModerationGate;

mock! {
    Moderation {}
    #[async_trait]
    impl ModerationService for Moderation {
        async fn classify(&self, text: &str) -> Result<bool, Error>;
    }
}

/// Slow moderation that counts calls, so concurrent adds really overlap.
#[derive(Default)]
struct SlowCountingModeration {
    calls: AtomicUsize,
}

#[async_trait]
impl ModerationService for SlowCountingModeration {
    async fn classify(&self, text: &str) -> Result<bool, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(text.contains("flag"))
    }
}

fn channel(raw: u64) -> ChannelId {
    ChannelId::new(raw).unwrap()
}

fn msg(raw: u64) -> MessageId {
    MessageId::new(raw).unwrap()
}

/// Memo off, so every call reaches the service.
fn cache_with(service: Arc<dyn ModerationService>, capacity: usize) -> MessageCache {
    let gate = ModerationGate::new(service).with_memo_capacity(0);
    MessageCache::new(capacity, Arc::new(gate))
}

fn permissive(expected_calls: usize) -> Arc<MockModeration> {
    let mut moderation = MockModeration::new();
    moderation
        .expect_classify()
        .times(expected_calls)
        .returning(|text| Ok(text.contains("flag")));
    Arc::new(moderation)
}

#[tokio::test]
async fn test_add_keeps_arrival_order_and_verdicts() -> Result<(), Error> {
    let cache = cache_with(permissive(3), 5);
    let ch = channel(10);

    cache.add(ch, msg(1), "alice", "hello").await?;
    let outcome = cache.add(ch, msg(2), "bob", "please flag me").await?;
    assert_eq!(outcome, AddOutcome::Inserted { flagged: true, evicted: None });
    cache.add(ch, msg(3), "carol", "bye").await?;

    let stored = cache.get_ordered(ch);
    let ids: Vec<u64> = stored.iter().map(|m| m.id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(stored[0].author, "alice");
    assert!(!stored[0].flagged);
    assert!(stored[1].flagged);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_is_noop_without_second_check() -> Result<(), Error> {
    let cache = cache_with(permissive(1), 5);
    let ch = channel(10);

    cache.add(ch, msg(1), "alice", "hello").await?;
    let before = cache.get_ordered(ch);

    let outcome = cache.add(ch, msg(1), "alice", "edited text").await?;
    assert_eq!(outcome, AddOutcome::Duplicate);
    assert_eq!(cache.get_ordered(ch), before);
    assert_eq!(cache.len(ch), 1);
    Ok(())
}

#[tokio::test]
async fn test_fifo_eviction_keeps_most_recent() -> Result<(), Error> {
    let capacity = 3;
    let cache = cache_with(permissive(capacity + 1), capacity);
    let ch = channel(10);

    for id in 1..=capacity as u64 {
        let outcome = cache.add(ch, msg(id), "alice", &format!("m{id}")).await?;
        assert!(matches!(outcome, AddOutcome::Inserted { evicted: None, .. }));
    }
    let outcome = cache.add(ch, msg(4), "alice", "m4").await?;
    match outcome {
        AddOutcome::Inserted { evicted: Some(old), .. } => assert_eq!(old.id, msg(1)),
        other => panic!("expected eviction, got {other:?}"),
    }

    let ids: Vec<u64> = cache.get_ordered(ch).iter().map(|m| m.id.get()).collect();
    assert_eq!(ids, vec![2, 3, 4]);
    assert!(!cache.contains(ch, msg(1)));
    Ok(())
}

#[tokio::test]
async fn test_length_never_exceeds_capacity_and_ids_unique() -> Result<(), Error> {
    let capacity = 4;
    let mut moderation = MockModeration::new();
    moderation.expect_classify().returning(|_| Ok(false));
    let cache = cache_with(Arc::new(moderation), capacity);
    let ch = channel(10);

    // Repeats mixed in on purpose.
    for id in [1u64, 2, 2, 3, 1, 4, 5, 5, 6, 7, 3, 8] {
        cache.add(ch, msg(id), "alice", "text").await?;
        let stored = cache.get_ordered(ch);
        assert!(stored.len() <= capacity);
        let unique: HashSet<MessageId> = stored.iter().map(|m| m.id).collect();
        assert_eq!(unique.len(), stored.len());
    }
    Ok(())
}

#[tokio::test]
async fn test_channels_are_independent() -> Result<(), Error> {
    let cache = cache_with(permissive(2), 1);

    cache.add(channel(1), msg(1), "alice", "one").await?;
    cache.add(channel(2), msg(1), "bob", "two").await?;

    assert_eq!(cache.get_ordered(channel(1))[0].content, "one");
    assert_eq!(cache.get_ordered(channel(2))[0].content, "two");
    Ok(())
}

#[tokio::test]
async fn test_unknown_channel_is_empty() {
    let cache = cache_with(permissive(0), 5);
    assert!(cache.get_ordered(channel(99)).is_empty());
    assert_eq!(cache.len(channel(99)), 0);
    assert!(cache.is_empty(channel(99)));
}

#[tokio::test]
async fn test_zero_capacity_stores_nothing_and_skips_moderation() -> Result<(), Error> {
    let cache = cache_with(permissive(0), 0);
    let ch = channel(10);

    assert_eq!(cache.add(ch, msg(1), "alice", "hi").await?, AddOutcome::Dropped);
    assert!(cache.get_ordered(ch).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_moderation_failure_leaves_cache_unchanged_and_id_retryable() -> Result<(), Error> {
    let mut moderation = MockModeration::new();
    let mut seq = mockall::Sequence::new();
    moderation
        .expect_classify()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(Error::ProviderUnavailable("moderation down".into())));
    moderation
        .expect_classify()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(false));
    let cache = cache_with(Arc::new(moderation), 5);
    let ch = channel(10);

    let err = cache.add(ch, msg(1), "alice", "hello").await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));
    assert!(cache.get_ordered(ch).is_empty());

    let outcome = cache.add(ch, msg(1), "alice", "hello").await?;
    assert!(matches!(outcome, AddOutcome::Inserted { flagged: false, .. }));
    assert_eq!(cache.len(ch), 1);
    Ok(())
}

#[tokio::test]
async fn test_clear_empties_channel() -> Result<(), Error> {
    let cache = cache_with(permissive(2), 5);
    let ch = channel(10);

    cache.add(ch, msg(1), "alice", "a").await?;
    cache.clear(ch);
    assert!(cache.is_empty(ch));

    // Cleared ids can be stored again.
    cache.add(ch, msg(1), "alice", "a").await?;
    assert_eq!(cache.len(ch), 1);
    Ok(())
}

#[tokio::test]
async fn test_add_oldest_fills_free_slots_in_front() -> Result<(), Error> {
    // msg(1) is offered when the buffer is already full and never reaches moderation.
    let cache = cache_with(permissive(3), 3);
    let ch = channel(10);

    cache.add(ch, msg(5), "alice", "newest").await?;
    assert_eq!(cache.oldest_id(ch), Some(msg(5)));

    let outcome = cache.add_oldest(ch, msg(3), "carol", "older").await?;
    assert_eq!(outcome, AddOutcome::Inserted { flagged: false, evicted: None });
    cache.add_oldest(ch, msg(2), "dave", "oldest").await?;
    assert_eq!(cache.add_oldest(ch, msg(1), "erin", "too old").await?, AddOutcome::Dropped);
    assert_eq!(cache.add_oldest(ch, msg(3), "carol", "older").await?, AddOutcome::Duplicate);

    let ids: Vec<u64> = cache.get_ordered(ch).iter().map(|m| m.id.get()).collect();
    assert_eq!(ids, vec![2, 3, 5]);
    assert_eq!(cache.oldest_id(ch), Some(msg(2)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_adds_each_land_once() -> Result<(), Error> {
    let capacity = 8;
    let moderation = Arc::new(SlowCountingModeration::default());
    let cache = Arc::new(cache_with(moderation.clone(), capacity));
    let ch = channel(10);

    let mut handles = Vec::new();
    for id in 1..=20u64 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.add(ch, msg(id), "alice", &format!("message {id}")).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap()?;
        assert!(matches!(outcome, AddOutcome::Inserted { .. }));
    }

    assert_eq!(cache.len(ch), capacity);
    assert_eq!(moderation.calls.load(Ordering::SeqCst), 20);
    let unique: HashSet<MessageId> = cache.get_ordered(ch).iter().map(|m| m.id).collect();
    assert_eq!(unique.len(), capacity);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_id_is_checked_once() -> Result<(), Error> {
    let moderation = Arc::new(SlowCountingModeration::default());
    let cache = Arc::new(cache_with(moderation.clone(), 5));
    let ch = channel(10);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.add(ch, msg(42), "alice", "same").await }));
    }

    let mut inserted = 0;
    for handle in handles {
        if let AddOutcome::Inserted { .. } = handle.await.unwrap()? {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(cache.len(ch), 1);
    assert_eq!(moderation.calls.load(Ordering::SeqCst), 1);
    Ok(())
}
