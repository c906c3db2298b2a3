// Finding model - 合规发现记录
// 发现记录、风险等级与来源等核心类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// 风险等级
///
/// 无法识别的输入会落入 `Unknown` 桶：可以入库，但不会被派发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Unknown => "unknown",
        }
    }

    /// 只有 high / medium 会触发外部动作
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Medium)
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Unknown,
        }
    }
}

impl From<String> for RiskLevel {
    fn from(value: String) -> Self {
        RiskLevel::parse(&value)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 发现来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Code,
    Screenshot,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Code => "code",
            Source::Screenshot => "screenshot",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "code" => Ok(Source::Code),
            "screenshot" => Ok(Source::Screenshot),
            other => Err(CoreError::Validation(format!("unknown source '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    Open,
    Resolved,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Open => "open",
            FindingStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "open" => Ok(FindingStatus::Open),
            "resolved" => Ok(FindingStatus::Resolved),
            other => Err(CoreError::Validation(format!("unknown finding status '{}'", other))),
        }
    }
}

/// 上游分析器产出的待处理发现
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingDraft {
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_ref: Option<u64>,
}

impl FindingDraft {
    pub fn new(summary: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            summary: summary.into(),
            description: String::new(),
            risk_level,
            control_id: None,
            source: Source::Code,
            pull_request_ref: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_control(mut self, control_id: impl Into<String>) -> Self {
        self.control_id = Some(control_id.into());
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn with_pull_request(mut self, number: u64) -> Self {
        self.pull_request_ref = Some(number);
        self
    }

    /// 在任何外部调用之前拒绝畸形草稿
    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            return Err(CoreError::Validation("summary must not be empty".to_string()));
        }
        if matches!(&self.control_id, Some(id) if id.trim().is_empty()) {
            return Err(CoreError::Validation("control_id must not be blank".to_string()));
        }
        Ok(())
    }
}

/// 已入库的发现记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub control_id: Option<String>,
    pub source: Source,
    pub ticket_ref: Option<String>,
    pub host_ref: Option<String>,
    pub chat_ref: Option<String>,
    pub status: FindingStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
}

impl Finding {
    pub fn is_open(&self) -> bool {
        self.status == FindingStatus::Open
    }
}
