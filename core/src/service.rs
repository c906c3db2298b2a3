// Compliance service - 对外入口
// submit / resolve / query_recent，负责把派发结果写入存储并关闭并发准入窗口

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::dispatch::{ActionResult, Channels, DispatchOutcome, Dispatcher};
use crate::error::{CoreError, Result};
use crate::finding::{Finding, FindingDraft, RiskLevel};
use crate::intake::AnalysisReport;
use crate::ledger::PolicyLedger;
use crate::store::FindingStore;

/// 一次 submit 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// 新建的记录；重复时为已存在的 open 记录
    pub finding: Option<Finding>,
    pub outcome: DispatchOutcome,
    pub created: bool,
}

type AdmissionKey = (String, RiskLevel);
type AdmissionMap = StdMutex<HashMap<AdmissionKey, Arc<Mutex<()>>>>;

/// 按去重键加锁：同一进程内，检查、派发、写入是一个整体
///
/// 每个键一把锁，不同键的提交互不等待；最后一个持有者释放后条目被移除。
#[derive(Default)]
struct AdmissionLocks {
    locks: Arc<AdmissionMap>,
}

impl AdmissionLocks {
    async fn lock(&self, summary: &str, risk_level: RiskLevel) -> AdmissionGuard {
        let key = (summary.to_string(), risk_level);
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };

        AdmissionGuard {
            guard: Some(mutex.lock_owned().await),
            key,
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct AdmissionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: AdmissionKey,
    locks: Arc<AdmissionMap>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        // 先释放键锁，再检查是否还有等待者持有同一把锁
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
            locks.remove(&self.key);
        }
    }
}

#[derive(Clone)]
pub struct ComplianceService {
    store: FindingStore,
    ledger: PolicyLedger,
    dispatcher: Dispatcher,
    admission: Arc<AdmissionLocks>,
}

impl ComplianceService {
    pub fn new(pool: SqlitePool, channels: Channels) -> Self {
        let store = FindingStore::new(pool.clone());
        Self {
            dispatcher: Dispatcher::new(store.clone(), channels),
            ledger: PolicyLedger::new(pool),
            store,
            admission: Arc::new(AdmissionLocks::default()),
        }
    }

    pub fn store(&self) -> &FindingStore {
        &self.store
    }

    pub fn ledger(&self) -> &PolicyLedger {
        &self.ledger
    }

    /// 接收一条发现：校验 → 去重 → 派发 → 入库
    ///
    /// 业务层面的情况（重复、通道失败）都体现在返回值里；
    /// 只有校验失败和存储错误会返回 `Err`。
    pub async fn submit(&self, draft: FindingDraft) -> Result<Submission> {
        draft.validate()?;

        let _admission = self.admission.lock(&draft.summary, draft.risk_level).await;

        let outcome = self.dispatcher.dispatch(&draft).await?;
        if outcome.action_result == ActionResult::Duplicate {
            let existing = self.store.find_open(&draft.summary, draft.risk_level).await?;
            return Ok(Submission {
                finding: existing,
                outcome,
                created: false,
            });
        }

        match self.store.create(&draft, &outcome).await {
            Ok(finding) => Ok(Submission {
                finding: Some(finding),
                outcome,
                created: true,
            }),
            Err(CoreError::Consistency(reason)) => {
                // 可派发：另一个进程先写入，按重复处理并重新读取胜者
                // 不可派发：同键的低风险记录已存在，属于正常的唯一索引命中
                if !draft.risk_level.is_dispatchable() {
                    tracing::debug!("Open twin already stored: {}", reason);
                } else if outcome.ticket_ref.is_some() || outcome.host_ref.is_some() {
                    tracing::warn!(
                        "Lost admission race ({}); orphaned ticket={:?} host={:?}",
                        reason,
                        outcome.ticket_ref,
                        outcome.host_ref
                    );
                } else {
                    tracing::warn!("Lost admission race: {}", reason);
                }

                let existing = self.store.find_open(&draft.summary, draft.risk_level).await?;
                let outcome = if draft.risk_level.is_dispatchable() {
                    DispatchOutcome::duplicate()
                } else {
                    DispatchOutcome::default()
                };
                Ok(Submission {
                    finding: existing,
                    outcome,
                    created: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 逐条提交分析报告中的问题；无效条目记录日志后跳过
    pub async fn submit_report(&self, report: AnalysisReport) -> Result<Vec<Submission>> {
        let mut submissions = Vec::new();

        for draft in report.into_drafts() {
            match self.submit(draft).await {
                Ok(submission) => submissions.push(submission),
                Err(CoreError::Validation(reason)) => {
                    tracing::warn!("Skipping invalid reported issue: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(submissions)
    }

    pub async fn resolve(&self, ticket_ref: &str) -> Result<Finding> {
        self.store.resolve(ticket_ref).await
    }

    pub async fn resolve_by_id(&self, id: i64) -> Result<Finding> {
        self.store.resolve_by_id(id).await
    }

    pub async fn query_recent(&self, limit: u32) -> Result<Vec<Finding>> {
        self.store.recent(limit).await
    }
}
