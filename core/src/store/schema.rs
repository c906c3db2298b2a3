use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// 打开（必要时创建）SQLite 数据库并确保表结构存在
pub async fn connect(url: &str) -> Result<SqlitePool> {
    // WAL + busy_timeout：多个写事务排队等待而不是直接失败
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    tracing::info!("Compliance store ready at {}", url);

    Ok(pool)
}

/// 创建表和索引（幂等）
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            summary TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            risk_level TEXT NOT NULL,
            control_id TEXT,
            source TEXT NOT NULL DEFAULT 'code',
            ticket_ref TEXT,
            host_ref TEXT,
            chat_ref TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            resolved_at TEXT,
            assignee TEXT
        );

        -- 去重键：同一 (summary, risk_level) 至多一条 open 记录
        CREATE UNIQUE INDEX IF NOT EXISTS ux_findings_open_identity
            ON findings(summary, risk_level) WHERE status = 'open';

        CREATE INDEX IF NOT EXISTS ix_findings_ticket_ref ON findings(ticket_ref);
        CREATE INDEX IF NOT EXISTS ix_findings_control_open
            ON findings(control_id) WHERE status = 'open';

        CREATE TABLE IF NOT EXISTS policies (
            control_id TEXT PRIMARY KEY NOT NULL,
            framework TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'passing'
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("compliance.db").display());
    let pool = connect(&url).await.unwrap();
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_schema_is_idempotent() {
        let (_dir, pool) = test_pool().await;
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('findings', 'policies') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec![("findings".to_string(),), ("policies".to_string(),)]);
    }
}
