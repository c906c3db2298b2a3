// Finding store - 发现记录存储
// 去重、生命周期与策略状态推导的唯一权威

mod schema;

#[cfg(test)]
pub(crate) use schema::test_pool;
pub use schema::{connect, init_schema};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::dispatch::DispatchOutcome;
use crate::error::{CoreError, Result};
use crate::finding::{Finding, FindingDraft, FindingStatus, RiskLevel, Source};

const FINDING_COLUMNS: &str = "id, created_at, summary, description, risk_level, control_id, source, \
     ticket_ref, host_ref, chat_ref, status, resolved_at, assignee";

// high → medium → low → unknown，同级按新旧排序
const RISK_ORDER: &str = "CASE risk_level WHEN 'high' THEN 1 WHEN 'medium' THEN 2 WHEN 'low' THEN 3 ELSE 4 END";

#[derive(FromRow)]
struct FindingRow {
    id: i64,
    created_at: String,
    summary: String,
    description: String,
    risk_level: String,
    control_id: Option<String>,
    source: String,
    ticket_ref: Option<String>,
    host_ref: Option<String>,
    chat_ref: Option<String>,
    status: String,
    resolved_at: Option<String>,
    assignee: Option<String>,
}

impl TryFrom<FindingRow> for Finding {
    type Error = CoreError;

    fn try_from(row: FindingRow) -> Result<Self> {
        Ok(Finding {
            id: row.id,
            created_at: parse_timestamp(&row.created_at)?,
            summary: row.summary,
            description: row.description,
            risk_level: RiskLevel::parse(&row.risk_level),
            control_id: row.control_id,
            source: Source::parse(&row.source)?,
            ticket_ref: row.ticket_ref,
            host_ref: row.host_ref,
            chat_ref: row.chat_ref,
            status: FindingStatus::parse(&row.status)?,
            resolved_at: row.resolved_at.as_deref().map(parse_timestamp).transpose()?,
            assignee: row.assignee,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| CoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

// 定宽格式，保证按文本排序与按时间排序一致
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn into_findings(rows: Vec<FindingRow>) -> Result<Vec<Finding>> {
    rows.into_iter().map(Finding::try_from).collect()
}

/// 仪表盘统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingStats {
    pub open: i64,
    pub resolved: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub unknown: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrendPoint {
    pub day: String,
    pub count: i64,
}

#[derive(Clone)]
pub struct FindingStore {
    pool: SqlitePool,
}

impl FindingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 是否已存在同一 (summary, risk_level) 的 open 记录
    pub async fn exists_open(&self, summary: &str, risk_level: RiskLevel) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM findings WHERE summary = ? AND risk_level = ? AND status = 'open'",
        )
        .bind(summary)
        .bind(risk_level.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn find_open(&self, summary: &str, risk_level: RiskLevel) -> Result<Option<Finding>> {
        let row = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {} FROM findings WHERE summary = ? AND risk_level = ? AND status = 'open'",
            FINDING_COLUMNS
        ))
        .bind(summary)
        .bind(risk_level.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Finding::try_from).transpose()
    }

    /// 写入新发现；关联的控制项在同一事务内置为 failing
    ///
    /// 唯一索引冲突（并发写入同一去重键）返回 [`CoreError::Consistency`]。
    pub async fn create(&self, draft: &FindingDraft, outcome: &DispatchOutcome) -> Result<Finding> {
        draft.validate()?;

        // 事务的第一条语句就是写操作，写锁在这里排队获取
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FindingRow>(&format!(
            "INSERT INTO findings (created_at, summary, description, risk_level, control_id, source, ticket_ref, host_ref, chat_ref, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'open')
             RETURNING {}",
            FINDING_COLUMNS
        ))
        .bind(now_timestamp())
        .bind(&draft.summary)
        .bind(&draft.description)
        .bind(draft.risk_level.as_str())
        .bind(&draft.control_id)
        .bind(draft.source.as_str())
        .bind(&outcome.ticket_ref)
        .bind(&outcome.host_ref)
        .bind(&outcome.chat_ref)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => CoreError::Consistency(format!(
                "open finding already exists for '{}' [{}]",
                draft.summary, draft.risk_level
            )),
            other => CoreError::Database(other),
        })?;

        if let Some(control_id) = &draft.control_id {
            sqlx::query("UPDATE policies SET status = 'failing' WHERE control_id = ?")
                .bind(control_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!("Policy {} marked failing", control_id);
        }

        tx.commit().await?;

        let finding = Finding::try_from(row)?;
        tracing::info!(
            "Stored finding #{}: {} [{}] control={} source={}",
            finding.id,
            finding.summary,
            finding.risk_level,
            finding.control_id.as_deref().unwrap_or("N/A"),
            finding.source.as_str()
        );
        Ok(finding)
    }

    /// 按工单号关闭 open 发现，并重新计算控制项状态
    ///
    /// 未知或已关闭的工单号返回 [`CoreError::NotFound`]，不修改任何状态。
    pub async fn resolve(&self, ticket_ref: &str) -> Result<Finding> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FindingRow>(&format!(
            "UPDATE findings SET status = 'resolved', resolved_at = ?
             WHERE ticket_ref = ? AND status = 'open'
             RETURNING {}",
            FINDING_COLUMNS
        ))
        .bind(now_timestamp())
        .bind(ticket_ref)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => finish_resolution(tx, row).await,
            None => {
                tracing::warn!("No open finding for ticket {}", ticket_ref);
                Err(CoreError::NotFound(format!("no open finding for ticket '{}'", ticket_ref)))
            }
        }
    }

    /// 按 id 关闭；用于工单步骤回退为评论、没有工单号的发现
    pub async fn resolve_by_id(&self, id: i64) -> Result<Finding> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FindingRow>(&format!(
            "UPDATE findings SET status = 'resolved', resolved_at = ?
             WHERE id = ? AND status = 'open'
             RETURNING {}",
            FINDING_COLUMNS
        ))
        .bind(now_timestamp())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => finish_resolution(tx, row).await,
            None => {
                tracing::warn!("No open finding with id {}", id);
                Err(CoreError::NotFound(format!("no open finding with id {}", id)))
            }
        }
    }

    /// 最新的发现在前
    pub async fn recent(&self, limit: u32) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {} FROM findings ORDER BY id DESC LIMIT ?",
            FINDING_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        into_findings(rows)
    }

    pub async fn list_open(&self) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {} FROM findings WHERE status = 'open' ORDER BY id",
            FINDING_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        into_findings(rows)
    }

    pub async fn get(&self, id: i64) -> Result<Finding> {
        let row = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {} FROM findings WHERE id = ?",
            FINDING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Finding::try_from(row),
            None => Err(CoreError::NotFound(format!("finding {} not found", id))),
        }
    }

    /// 设置或清除负责人；空字符串视为清除
    ///
    /// 写入在返回前提交，随后的队列查询（可能落在其他连接上）立即可见。
    pub async fn assign(&self, id: i64, assignee: Option<&str>) -> Result<Finding> {
        let assignee = assignee.map(str::trim).filter(|a| !a.is_empty());
        let mut tx = self.pool.begin().await?;

        // fetch_all 把语句执行到底，否则 RETURNING 的写入会挂起
        let mut rows = sqlx::query_as::<_, FindingRow>(&format!(
            "UPDATE findings SET assignee = ? WHERE id = ? RETURNING {}",
            FINDING_COLUMNS
        ))
        .bind(assignee)
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        match rows.pop() {
            Some(row) => {
                tx.commit().await?;
                tracing::info!("Finding #{} assignee set to {:?}", id, assignee);
                Finding::try_from(row)
            }
            None => Err(CoreError::NotFound(format!("finding {} not found", id))),
        }
    }

    /// 待分派队列：open 且无人负责
    pub async fn triage_queue(&self, limit: u32) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {} FROM findings
             WHERE status = 'open' AND assignee IS NULL
             ORDER BY {}, id DESC
             LIMIT ?",
            FINDING_COLUMNS, RISK_ORDER
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        into_findings(rows)
    }

    pub async fn assigned_queue(&self, assignee: &str, limit: u32) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(&format!(
            "SELECT {} FROM findings
             WHERE status = 'open' AND assignee = ?
             ORDER BY {}, id DESC
             LIMIT ?",
            FINDING_COLUMNS, RISK_ORDER
        ))
        .bind(assignee)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        into_findings(rows)
    }

    pub async fn stats(&self) -> Result<FindingStats> {
        let (open, resolved, high, medium, low, unknown) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64)>(
                "SELECT
                    COALESCE(SUM(CASE WHEN status = 'open' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'resolved' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN risk_level = 'high' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN risk_level = 'medium' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN risk_level = 'low' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN risk_level = 'unknown' THEN 1 ELSE 0 END), 0)
                 FROM findings",
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(FindingStats {
            open,
            resolved,
            high,
            medium,
            low,
            unknown,
        })
    }

    /// 每日新增发现数，可按风险等级过滤
    pub async fn trends(&self, risk_level: Option<RiskLevel>) -> Result<Vec<TrendPoint>> {
        let points = match risk_level {
            Some(risk) => {
                sqlx::query_as::<_, TrendPoint>(
                    "SELECT substr(created_at, 1, 10) AS day, COUNT(*) AS count
                     FROM findings WHERE risk_level = ?
                     GROUP BY day ORDER BY day",
                )
                .bind(risk.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TrendPoint>(
                    "SELECT substr(created_at, 1, 10) AS day, COUNT(*) AS count
                     FROM findings GROUP BY day ORDER BY day",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(points)
    }
}

async fn finish_resolution(mut tx: Transaction<'_, Sqlite>, row: FindingRow) -> Result<Finding> {
    if let Some(control_id) = &row.control_id {
        recompute_control(&mut tx, control_id).await?;
    }
    tx.commit().await?;

    let finding = Finding::try_from(row)?;
    tracing::info!(
        "Resolved finding #{} (ticket {})",
        finding.id,
        finding.ticket_ref.as_deref().unwrap_or("N/A")
    );
    Ok(finding)
}

/// failing 当且仅当仍有引用该控制项的 open 发现
async fn recompute_control(tx: &mut Transaction<'_, Sqlite>, control_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE policies
         SET status = CASE
             WHEN EXISTS (SELECT 1 FROM findings WHERE control_id = ? AND status = 'open') THEN 'failing'
             ELSE 'passing'
         END
         WHERE control_id = ?",
    )
    .bind(control_id)
    .bind(control_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
