//! Common test utilities
//!
//! Integration tests need a MySQL server reachable through `DATABASE_URL`.
//! Each pool gets its own freshly migrated database, so tests never share
//! rows. When no server is available the tests print a note and return.

use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Executor, MySqlPool};
use std::sync::Once;

/// Ensure .env file is loaded once
static ENV_INIT: Once = Once::new();

fn init_env() {
    ENV_INIT.call_once(|| {
        let _ = dotenvy::dotenv();
    });
}

fn server_url(url: &str) -> &str {
    match url.rfind('/') {
        Some(pos) if url[..pos].ends_with('/') => url,
        Some(pos) => &url[..pos],
        None => url,
    }
}

/// Pool on a new, migrated database named `rowguard_test_<uuid>`.
pub async fn get_test_pool() -> Result<MySqlPool, sqlx::Error> {
    init_env();
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| sqlx::Error::Configuration("DATABASE_URL is not set".into()))?;
    let base = server_url(&url).to_string();

    let root_pool = MySqlPoolOptions::new()
        .max_connections(1)
        .connect(&base)
        .await?;
    let db_name = format!("rowguard_test_{}", uuid::Uuid::new_v4().simple());
    root_pool
        .execute(format!("CREATE DATABASE `{}`", db_name).as_str())
        .await?;
    root_pool.close().await;

    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&format!("{}/{}", base, db_name))
        .await?;
    setup_database(&pool).await?;
    Ok(pool)
}

pub async fn setup_database(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
