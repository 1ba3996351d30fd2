// src/db/mod.rs

use anyhow::Context;
use sqlx::{Pool, Postgres};
use tracing::info;

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Pool<Postgres>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("connecting to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("applying migrations")?;

    info!(max_connections, "connected to PostgreSQL");
    Ok(pool)
}
