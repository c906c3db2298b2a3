// Compliance Core Library
// 核心功能库，包含发现存储、策略台账、动作派发与外部通道

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod finding;
pub mod intake;
pub mod ledger;
pub mod service;
pub mod store;

// 重新导出常用类型
pub use config::ChannelConfig;
pub use dispatch::{ActionResult, Channels, DispatchOutcome, Dispatcher};
pub use finding::{Finding, FindingDraft, FindingStatus, RiskLevel, Source};
pub use intake::AnalysisReport;
pub use ledger::{ControlEntry, ControlStatus, PolicyControl, PolicyLedger, PolicyStats};
pub use service::{ComplianceService, Submission};
pub use store::{connect, init_schema, FindingStats, FindingStore, TrendPoint};

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CoreError {
        #[error("Validation error: {0}")]
        Validation(String),

        #[error("Not found: {0}")]
        NotFound(String),

        /// 并发写入时违反了 open 发现的唯一约束
        #[error("Consistency error: {0}")]
        Consistency(String),

        #[error("Database error: {0}")]
        Database(#[from] sqlx::Error),

        #[error("Catalog error: {0}")]
        Catalog(String),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
