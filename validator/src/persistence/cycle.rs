//! Tracks the allowance backfill's high-water mark in the `cycle` table: a
//! cycle's `end_block` is the last block this process has already
//! credited, so a restart resumes instead of re-crediting from scratch.

use sqlx::PgPool;

pub async fn last_processed_block(pool: &PgPool, fallback: i64) -> i64 {
    let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT max(end_block) FROM cycle")
        .fetch_optional(pool)
        .await
        .unwrap_or(None);
    row.and_then(|(end_block,)| end_block).unwrap_or(fallback)
}

pub async fn record_processed_block(pool: &PgPool, block: i64) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO cycle (start_block, end_block) VALUES ($1, $1)")
        .bind(block)
        .execute(pool)
        .await?;
    Ok(())
}
