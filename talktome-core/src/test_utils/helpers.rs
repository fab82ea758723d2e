// File: talktome-core/src/test_utils/helpers.rs

use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, Pool, Postgres};
use tracing::debug;

use crate::Error;
use crate::db::Database;

const TEST_DB_NAME: &str = "talktome_test";

/// Create the test database if it does not exist yet.
pub async fn ensure_test_database_exists() -> Result<(), Error> {
    let admin_url = std::env::var("DATABASE_ADMIN_URL")
        .unwrap_or_else(|_| "postgres://talktome@localhost/postgres".to_string());

    let mut conn = PgConnection::connect(&admin_url).await?;

    let create_db_sql = format!("CREATE DATABASE {TEST_DB_NAME};");
    match sqlx::query(&create_db_sql).execute(&mut conn).await {
        Ok(_) => debug!("Created test DB '{TEST_DB_NAME}'."),
        // 42P04 => duplicate_database
        Err(e) if e.as_database_error().and_then(|db| db.code()).as_deref() == Some("42P04") => {
            debug!("Test DB '{TEST_DB_NAME}' already exists; ignoring.");
        }
        Err(e) => return Err(Error::Storage(e)),
    }

    Ok(())
}

/// Create a connection pool to the test DB.
/// By default looks for `TEST_DATABASE_URL` in env,
/// else uses `postgres://talktome@localhost/talktome_test`.
pub async fn create_test_db_pool() -> Result<Pool<Postgres>, Error> {
    let url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| format!("postgres://talktome@localhost/{TEST_DB_NAME}"));

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    Ok(pool)
}

/// Wipes out test data so each test can start fresh.
pub async fn clean_database(pool: &Pool<Postgres>) -> Result<(), Error> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            request_tokens,
            channel_token_limits
        RESTART IDENTITY CASCADE;
        "#,
    )
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns a migrated, empty test DB handle.
pub async fn setup_test_database() -> Result<Database, Error> {
    ensure_test_database_exists().await?;

    let pool = create_test_db_pool().await?;
    let db = Database::from_pool(pool);
    db.migrate().await?;
    clean_database(db.pool()).await?;

    Ok(db)
}
