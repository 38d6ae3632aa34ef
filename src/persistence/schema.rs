//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so they are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id               TEXT PRIMARY KEY NOT NULL,
    owner_user_id    TEXT NOT NULL,
    kind             TEXT NOT NULL CHECK(kind IN ('oneshot','multishot','edit','price_update')),
    status           TEXT NOT NULL CHECK(status IN ('active','completed','cancelled')),
    screenshot_limit INTEGER NOT NULL,
    screenshot_count INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    expires_at       TEXT NOT NULL,
    completed_at     TEXT
);

CREATE TABLE IF NOT EXISTS working_set_item (
    id              TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL REFERENCES session(id) ON DELETE CASCADE,
    position        INTEGER NOT NULL,
    name            TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    catalog_id      TEXT,
    quantity        INTEGER NOT NULL CHECK(quantity >= 1),
    sell_prices     TEXT NOT NULL DEFAULT '[]',
    buy_prices      TEXT NOT NULL DEFAULT '[]',
    avg_sell        REAL NOT NULL DEFAULT 0,
    avg_buy         REAL NOT NULL DEFAULT 0,
    market_url      TEXT,
    source          TEXT NOT NULL CHECK(source IN ('screenshot','spreadsheet')),
    created_at      TEXT NOT NULL,
    UNIQUE(session_id, normalized_name)
);

CREATE INDEX IF NOT EXISTS idx_session_owner ON session(owner_user_id, status);
CREATE INDEX IF NOT EXISTS idx_item_session ON working_set_item(session_id, position);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
