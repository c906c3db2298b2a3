// Policy ledger - 策略控制项台账
// 只读视图：状态只能由发现的创建/关闭推导，不对外提供直接写入

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fs;
use std::path::Path;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Passing,
    Failing,
}

impl ControlStatus {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "passing" => Ok(ControlStatus::Passing),
            "failing" => Ok(ControlStatus::Failing),
            other => Err(CoreError::Catalog(format!("unknown control status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyControl {
    pub control_id: String,
    pub framework: String,
    pub title: String,
    pub description: String,
    pub status: ControlStatus,
}

#[derive(FromRow)]
struct PolicyRow {
    control_id: String,
    framework: String,
    title: String,
    description: String,
    status: String,
}

impl TryFrom<PolicyRow> for PolicyControl {
    type Error = CoreError;

    fn try_from(row: PolicyRow) -> Result<Self> {
        Ok(PolicyControl {
            control_id: row.control_id,
            framework: row.framework,
            title: row.title,
            description: row.description,
            status: ControlStatus::parse(&row.status)?,
        })
    }
}

/// 外部目录中的一条控制项定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEntry {
    pub control_id: String,
    pub framework: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl ControlEntry {
    pub fn new(control_id: impl Into<String>, framework: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            control_id: control_id.into(),
            framework: framework.into(),
            title: title.into(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    controls: Vec<ControlEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStats {
    pub total: i64,
    pub passing: i64,
    pub failing: i64,
    /// 通过率百分比，保留一位小数
    pub compliance_score: f64,
}

#[derive(Clone)]
pub struct PolicyLedger {
    pool: SqlitePool,
}

impl PolicyLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, control_id: &str) -> Result<PolicyControl> {
        let row = sqlx::query_as::<_, PolicyRow>(
            "SELECT control_id, framework, title, description, status FROM policies WHERE control_id = ?",
        )
        .bind(control_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => PolicyControl::try_from(row),
            None => Err(CoreError::NotFound(format!("policy control '{}' not found", control_id))),
        }
    }

    pub async fn list(&self) -> Result<Vec<PolicyControl>> {
        let rows = sqlx::query_as::<_, PolicyRow>(
            "SELECT control_id, framework, title, description, status FROM policies ORDER BY control_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PolicyControl::try_from).collect()
    }

    pub async fn stats(&self) -> Result<PolicyStats> {
        let (total, passing, failing) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'passing' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failing' THEN 1 ELSE 0 END), 0)
             FROM policies",
        )
        .fetch_one(&self.pool)
        .await?;

        let compliance_score = if total > 0 {
            (passing as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(PolicyStats {
            total,
            passing,
            failing,
            compliance_score,
        })
    }

    /// 导入目录（已存在的控制项保持不变）
    ///
    /// 新控制项的状态按当前 open 发现推导，而不是一律 passing。
    pub async fn load_catalog(&self, entries: &[ControlEntry]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for entry in entries {
            if entry.control_id.trim().is_empty() {
                return Err(CoreError::Catalog("control_id must not be empty".to_string()));
            }

            let result = sqlx::query(
                "INSERT OR IGNORE INTO policies (control_id, framework, title, description, status)
                 VALUES (?, ?, ?, ?,
                     CASE WHEN EXISTS (SELECT 1 FROM findings WHERE control_id = ? AND status = 'open')
                          THEN 'failing' ELSE 'passing' END)",
            )
            .bind(&entry.control_id)
            .bind(&entry.framework)
            .bind(&entry.title)
            .bind(&entry.description)
            .bind(&entry.control_id)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        tracing::info!("Loaded {} new policy controls ({} in catalog)", inserted, entries.len());

        Ok(inserted)
    }

    /// 从 YAML 文件导入目录
    pub async fn load_catalog_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let entries = parse_catalog(&content)
            .map_err(|e| CoreError::Catalog(format!("Failed to parse catalog {:?}: {}", path, e)))?;

        self.load_catalog(&entries).await
    }
}

// 先尝试 `controls:` 包装格式，再尝试裸列表
fn parse_catalog(content: &str) -> std::result::Result<Vec<ControlEntry>, serde_yaml::Error> {
    match serde_yaml::from_str::<Catalog>(content) {
        Ok(catalog) => Ok(catalog.controls),
        Err(_) => serde_yaml::from_str::<Vec<ControlEntry>>(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchOutcome;
    use crate::finding::{FindingDraft, RiskLevel};
    use crate::store::{test_pool, FindingStore};
    use std::io::Write;

    #[tokio::test]
    async fn get_unknown_control_is_not_found() {
        let (_dir, pool) = test_pool().await;
        let ledger = PolicyLedger::new(pool);
        assert!(matches!(ledger.get("CC-404").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn load_catalog_is_insert_or_ignore() {
        let (_dir, pool) = test_pool().await;
        let ledger = PolicyLedger::new(pool);
        let entries = vec![
            ControlEntry::new("CC-2", "SOC2", "Change management"),
            ControlEntry::new("CC-1", "SOC2", "Logical access"),
        ];

        assert_eq!(ledger.load_catalog(&entries).await.unwrap(), 2);
        assert_eq!(ledger.load_catalog(&entries).await.unwrap(), 0);

        let ids: Vec<_> = ledger.list().await.unwrap().into_iter().map(|c| c.control_id).collect();
        assert_eq!(ids, vec!["CC-1", "CC-2"]);
    }

    #[tokio::test]
    async fn late_loaded_control_derives_status_from_open_findings() {
        let (_dir, pool) = test_pool().await;
        let store = FindingStore::new(pool.clone());
        let ledger = PolicyLedger::new(pool);
        store
            .create(
                &FindingDraft::new("Plaintext secret", RiskLevel::High).with_control("A.9.2"),
                &DispatchOutcome::default(),
            )
            .await
            .unwrap();

        ledger
            .load_catalog(&[ControlEntry::new("A.9.2", "ISO27001", "User access provisioning")])
            .await
            .unwrap();

        assert_eq!(ledger.get("A.9.2").await.unwrap().status, ControlStatus::Failing);
    }

    #[tokio::test]
    async fn stats_compute_compliance_score() {
        let (_dir, pool) = test_pool().await;
        let store = FindingStore::new(pool.clone());
        let ledger = PolicyLedger::new(pool);
        ledger
            .load_catalog(&[
                ControlEntry::new("CC-1", "SOC2", "a"),
                ControlEntry::new("CC-2", "SOC2", "b"),
                ControlEntry::new("CC-3", "SOC2", "c"),
            ])
            .await
            .unwrap();
        store
            .create(&FindingDraft::new("x", RiskLevel::Medium).with_control("CC-3"), &DispatchOutcome::default())
            .await
            .unwrap();

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.passing, 2);
        assert_eq!(stats.failing, 1);
        assert_eq!(stats.compliance_score, 66.7);
    }

    #[tokio::test]
    async fn empty_ledger_scores_zero() {
        let (_dir, pool) = test_pool().await;
        let stats = PolicyLedger::new(pool).stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.compliance_score, 0.0);
    }

    #[tokio::test]
    async fn load_catalog_file_accepts_both_layouts() {
        let (dir, pool) = test_pool().await;
        let ledger = PolicyLedger::new(pool);

        let wrapped = dir.path().join("wrapped.yaml");
        let mut file = fs::File::create(&wrapped).unwrap();
        writeln!(
            file,
            "controls:\n  - control_id: CC-6.1\n    framework: SOC2\n    title: Logical access security\n    description: Restrict access to information assets"
        )
        .unwrap();

        let bare = dir.path().join("bare.yaml");
        let mut file = fs::File::create(&bare).unwrap();
        writeln!(file, "- control_id: A.12.4\n  framework: ISO27001\n  title: Logging and monitoring").unwrap();

        assert_eq!(ledger.load_catalog_file(&wrapped).await.unwrap(), 1);
        assert_eq!(ledger.load_catalog_file(&bare).await.unwrap(), 1);

        let control = ledger.get("CC-6.1").await.unwrap();
        assert_eq!(control.framework, "SOC2");
        assert_eq!(control.description, "Restrict access to information assets");
        assert_eq!(ledger.get("A.12.4").await.unwrap().description, "");
    }

    #[tokio::test]
    async fn malformed_catalog_is_rejected() {
        let (dir, pool) = test_pool().await;
        let ledger = PolicyLedger::new(pool);
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "controls: 42").unwrap();

        assert!(matches!(ledger.load_catalog_file(&path).await, Err(CoreError::Catalog(_))));
    }

    #[test]
    fn bundled_catalog_parses() {
        let entries = parse_catalog(include_str!("../../policies.yaml")).unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| !e.description.is_empty()));
    }
}
