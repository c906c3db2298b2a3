// Intake - 分析报告到发现草稿的转换
// 代码差异分析器与截图分析器产出同样的报告格式

use serde::{Deserialize, Serialize};

use crate::finding::{FindingDraft, RiskLevel, Source};

fn unknown_risk() -> RiskLevel {
    RiskLevel::Unknown
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedIssue {
    #[serde(rename = "type", default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
}

/// 一次分析的结果：整份报告共享同一风险等级与控制项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default = "unknown_risk")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub issues: Vec<ReportedIssue>,
    #[serde(default)]
    pub control_id: Option<String>,
    #[serde(default)]
    pub source: Source,
}

impl AnalysisReport {
    pub fn into_drafts(self) -> Vec<FindingDraft> {
        let AnalysisReport {
            risk_level,
            issues,
            control_id,
            source,
        } = self;

        issues
            .into_iter()
            .map(|issue| FindingDraft {
                summary: issue.issue_type.unwrap_or_else(|| "Unknown issue".to_string()),
                description: issue.description.unwrap_or_else(|| "No description".to_string()),
                risk_level,
                control_id: control_id.clone(),
                source,
                pull_request_ref: issue.pr_number,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_expands_to_one_draft_per_issue() {
        let report: AnalysisReport = serde_json::from_str(
            r#"{
                "risk_level": "medium",
                "control_id": "CC-7.1",
                "source": "screenshot",
                "issues": [
                    {"type": "Exposed debug endpoint", "description": "/debug is public", "pr_number": 42},
                    {"description": "no type given"}
                ]
            }"#,
        )
        .unwrap();

        let drafts = report.into_drafts();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].summary, "Exposed debug endpoint");
        assert_eq!(drafts[0].pull_request_ref, Some(42));
        assert_eq!(drafts[0].source, Source::Screenshot);
        assert_eq!(drafts[1].summary, "Unknown issue");
        assert!(drafts.iter().all(|d| d.risk_level == RiskLevel::Medium));
        assert!(drafts.iter().all(|d| d.control_id.as_deref() == Some("CC-7.1")));
    }

    #[test]
    fn missing_risk_level_is_unknown() {
        let report: AnalysisReport = serde_json::from_str(r#"{"issues": [{"type": "x"}]}"#).unwrap();
        assert_eq!(report.risk_level, RiskLevel::Unknown);
        assert_eq!(report.into_drafts()[0].description, "No description");
    }
}
