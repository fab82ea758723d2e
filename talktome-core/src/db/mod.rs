// talktome-core/src/db/mod.rs

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::Error;
use crate::repositories::PostgresQuotaLedger;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a query waits for a free connection before failing with a
/// storage error.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection pool for the quota ledger. Connections are borrowed per query
/// and go back to the pool when the borrow ends, on every exit path.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, Error> {
        Self::connect(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;

        info!(
            "Connected to Postgres at {} (pool size {})",
            redact_url(database_url),
            max_connections
        );
        Ok(Self { pool })
    }

    /// Creates `request_tokens` and `channel_token_limits` if needed.
    pub async fn migrate(&self) -> Result<(), Error> {
        info!("Applying migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations applied successfully.");
        Ok(())
    }

    /// The token ledger stored in this database.
    pub fn quota_ledger(&self) -> PostgresQuotaLedger {
        PostgresQuotaLedger::new(self.pool.clone())
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Connection URL with the password masked, for logs.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
