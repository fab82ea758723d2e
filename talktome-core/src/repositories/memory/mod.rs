pub mod quota_ledger;

pub use quota_ledger::InMemoryQuotaLedger;
