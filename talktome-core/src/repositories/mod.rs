pub mod memory;
pub mod postgres;

pub use memory::InMemoryQuotaLedger;
pub use postgres::PostgresQuotaLedger;
