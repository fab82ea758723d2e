// File: talktome-core/tests/conversation_tests.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;

use talktome_common::models::{
    CachedMessage, ChannelId, ChatMessage, ChatRole, MessageId, ModelReply, UsageRecord,
};
use talktome_common::traits::{ChatModel, QuotaLedger};
use talktome_core::Error;
use talktome_core::quota::{QuotaEngine, QuotaPolicy};
use talktome_core::repositories::InMemoryQuotaLedger;
use talktome_core::services::ConversationAssembler;

mock! {
    Model {}
    #[async_trait]
    impl ChatModel for Model {
        fn name(&self) -> &str;
        async fn generate(
            &self,
            messages: &[ChatMessage],
            system_prompt: &str,
        ) -> Result<ModelReply, Error>;
    }
}

mock! {
    Ledger {}
    #[async_trait]
    impl QuotaLedger for Ledger {
        async fn append(
            &self,
            channel_id: ChannelId,
            tokens: i64,
            at: DateTime<Utc>,
        ) -> Result<(), Error>;
        async fn query(
            &self,
            channel_id: ChannelId,
            since: DateTime<Utc>,
        ) -> Result<Vec<UsageRecord>, Error>;
        async fn list(&self, channel_id: ChannelId) -> Result<Vec<UsageRecord>, Error>;
        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;
        async fn delete_for_channel(&self, channel_id: ChannelId) -> Result<u64, Error>;
        async fn get_override_limit(&self, channel_id: ChannelId) -> Result<Option<i64>, Error>;
        async fn set_override_limit(&self, channel_id: ChannelId, limit: i64) -> Result<(), Error>;
        async fn delete_override_limit(&self, channel_id: ChannelId) -> Result<bool, Error>;
    }
}

/// Never answers within any reasonable timeout.
struct HangingModel;

#[async_trait]
impl ChatModel for HangingModel {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _system_prompt: &str,
    ) -> Result<ModelReply, Error> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ModelReply { content: "too late".into(), tokens_used: 5 })
    }
}

fn channel() -> ChannelId {
    ChannelId::new(77).unwrap()
}

fn cached(id: u64, author: &str, content: &str, flagged: bool) -> CachedMessage {
    CachedMessage {
        id: MessageId::new(id).unwrap(),
        content: content.to_string(),
        author: author.to_string(),
        flagged,
    }
}

fn quota() -> (Arc<InMemoryQuotaLedger>, Arc<QuotaEngine>) {
    let ledger = Arc::new(InMemoryQuotaLedger::new());
    let engine = Arc::new(QuotaEngine::new(ledger.clone(), QuotaPolicy::new(1000)));
    (ledger, engine)
}

#[test]
fn test_build_drops_flagged_and_marks_bot_turns() {
    let messages = vec![
        cached(1, "alice", "hi @talktome", false),
        cached(2, "mallory", "something awful", true),
        cached(3, "talktome", "Hello alice!", false),
        cached(4, "alice", "how are you?", false),
    ];

    let conversation = ConversationAssembler::build(&messages, "talktome");
    assert_eq!(
        conversation,
        vec![
            ChatMessage::user("alice: hi @talktome"),
            ChatMessage::assistant("Hello alice!"),
            ChatMessage::user("alice: how are you?"),
        ]
    );
    assert!(conversation.iter().all(|m| m.role != ChatRole::System));
}

#[tokio::test]
async fn test_respond_records_reported_tokens() -> Result<(), Error> {
    let (ledger, engine) = quota();
    let mut model = MockModel::new();
    model
        .expect_generate()
        .withf(|messages, system_prompt| {
            messages.len() == 1 && system_prompt.to_string() == "Be nice."
        })
        .times(1)
        .returning(|_, _| Ok(ModelReply { content: "sure".into(), tokens_used: 42 }));

    let assembler = ConversationAssembler::new(Arc::new(model), engine);
    let reply = assembler
        .respond(channel(), &[cached(1, "alice", "hello", false)], "talktome", "Be nice.")
        .await?;

    assert_eq!(reply.content, "sure");
    let records = ledger.list(channel()).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tokens, 42);
    Ok(())
}

#[tokio::test]
async fn test_model_failure_records_nothing() -> Result<(), Error> {
    let (ledger, engine) = quota();
    let mut model = MockModel::new();
    model
        .expect_generate()
        .returning(|_, _| Err(Error::ProviderUnavailable("503".into())));

    let assembler = ConversationAssembler::new(Arc::new(model), engine);
    let err = assembler
        .respond(channel(), &[cached(1, "alice", "hello", false)], "talktome", "")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ProviderUnavailable(_)));
    assert!(ledger.list(channel()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_model_timeout_records_nothing() -> Result<(), Error> {
    let (ledger, engine) = quota();
    let assembler = ConversationAssembler::new(Arc::new(HangingModel), engine)
        .with_timeout(Duration::from_millis(50));

    let err = assembler
        .respond(channel(), &[cached(1, "alice", "hello", false)], "talktome", "")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    assert!(ledger.list(channel()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_ledger_failure_after_reply_is_surfaced() {
    let mut ledger = MockLedger::new();
    ledger
        .expect_append()
        .times(1)
        .returning(|_, _, _| Err(Error::Storage(sqlx::Error::PoolTimedOut)));
    let engine = Arc::new(QuotaEngine::new(Arc::new(ledger), QuotaPolicy::new(1000)));

    let mut model = MockModel::new();
    model
        .expect_generate()
        .returning(|_, _| Ok(ModelReply { content: "answer".into(), tokens_used: 9 }));

    let assembler = ConversationAssembler::new(Arc::new(model), engine);
    let err = assembler
        .respond(channel(), &[cached(1, "alice", "hello", false)], "talktome", "")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
}
