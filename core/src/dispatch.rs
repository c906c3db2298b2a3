// Action dispatcher - 动作派发
// 对新的非重复发现依次执行：工单 → 代码托管 → 聊天通知

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::channels::{
    ChannelError, ChatNotifier, CodeHost, GitHubHost, IssueRequest, JiraTracker, SlackNotifier,
    TicketRequest, TicketTracker,
};
use crate::config::{ChannelConfig, DEFAULT_CALL_TIMEOUT};
use crate::error::Result;
use crate::finding::{FindingDraft, RiskLevel};
use crate::store::FindingStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    #[default]
    None,
    Duplicate,
    TicketCreated,
    Commented,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionResult::None => "none",
            ActionResult::Duplicate => "duplicate",
            ActionResult::TicketCreated => "ticket_created",
            ActionResult::Commented => "commented",
        }
    }
}

/// 派发结果，用于填充发现记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub ticket_ref: Option<String>,
    pub host_ref: Option<String>,
    pub chat_ref: Option<String>,
    pub chat_sent: bool,
    pub action_result: ActionResult,
}

impl DispatchOutcome {
    pub fn duplicate() -> Self {
        Self {
            action_result: ActionResult::Duplicate,
            ..Self::default()
        }
    }
}

/// 已配置的外部通道；`None` 表示该通道缺少凭据
#[derive(Clone)]
pub struct Channels {
    pub tickets: Option<Arc<dyn TicketTracker>>,
    pub chat: Option<Arc<dyn ChatNotifier>>,
    pub code_host: Option<Arc<dyn CodeHost>>,
    pub call_timeout: Duration,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            tickets: None,
            chat: None,
            code_host: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl Channels {
    pub fn none() -> Self {
        Self::default()
    }

    /// 按配置构建 HTTP 通道；客户端构建失败的通道视为未配置
    pub fn from_config(config: &ChannelConfig) -> Self {
        let timeout = config.call_timeout;

        let tickets = config.jira.clone().and_then(|jira| match JiraTracker::new(jira, timeout) {
            Ok(tracker) => Some(Arc::new(tracker) as Arc<dyn TicketTracker>),
            Err(e) => {
                tracing::warn!("Jira channel disabled: {}", e);
                None
            }
        });
        let chat = config.slack.clone().and_then(|slack| match SlackNotifier::new(slack, timeout) {
            Ok(notifier) => Some(Arc::new(notifier) as Arc<dyn ChatNotifier>),
            Err(e) => {
                tracing::warn!("Slack channel disabled: {}", e);
                None
            }
        });
        let code_host = config.github.clone().and_then(|github| match GitHubHost::new(github, timeout) {
            Ok(host) => Some(Arc::new(host) as Arc<dyn CodeHost>),
            Err(e) => {
                tracing::warn!("GitHub channel disabled: {}", e);
                None
            }
        });

        for (name, enabled) in [
            ("ticket tracker", tickets.is_some()),
            ("chat", chat.is_some()),
            ("code host", code_host.is_some()),
        ] {
            if !enabled {
                tracing::warn!("{} credentials missing, channel will be skipped", name);
            }
        }

        Self {
            tickets,
            chat,
            code_host,
            call_timeout: timeout,
        }
    }

    pub fn with_tickets(mut self, tracker: Arc<dyn TicketTracker>) -> Self {
        self.tickets = Some(tracker);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatNotifier>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_code_host(mut self, host: Arc<dyn CodeHost>) -> Self {
        self.code_host = Some(host);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: FindingStore,
    channels: Channels,
}

impl Dispatcher {
    pub fn new(store: FindingStore, channels: Channels) -> Self {
        Self { store, channels }
    }

    /// 决定并执行外部通知
    ///
    /// 通道失败只记录日志；只有草稿校验失败和存储不可用会返回错误。
    /// 派发器自身只读存储（重复检查），写入由调用方完成。
    pub async fn dispatch(&self, draft: &FindingDraft) -> Result<DispatchOutcome> {
        draft.validate()?;

        let risk = draft.risk_level;
        if !risk.is_dispatchable() {
            tracing::debug!("No action for {} risk finding: {}", risk, draft.summary);
            return Ok(DispatchOutcome::default());
        }

        // 去重检查必须在任何外部调用之前
        if self.store.exists_open(&draft.summary, risk).await? {
            tracing::warn!("Duplicate finding skipped: {} [{}]", draft.summary, risk);
            return Ok(DispatchOutcome::duplicate());
        }

        let mut outcome = DispatchOutcome::default();

        match self.create_ticket(draft).await {
            Ok(key) => {
                outcome.ticket_ref = Some(key);
                outcome.action_result = ActionResult::TicketCreated;
            }
            Err(e) => {
                tracing::warn!("Ticket creation failed for '{}': {}", draft.summary, e);
                if let Err(e) = self.comment_on_fallback(draft).await {
                    tracing::warn!("Fallback comment failed: {}", e);
                }
                outcome.action_result = ActionResult::Commented;
            }
        }

        match self.notify_code_host(draft).await {
            Ok(link) => outcome.host_ref = link,
            Err(e) => tracing::warn!("Code host step failed for '{}': {}", draft.summary, e),
        }

        match self.notify_chat(draft, outcome.action_result).await {
            Ok(chat_ref) => {
                outcome.chat_sent = true;
                outcome.chat_ref = chat_ref;
            }
            Err(e) => tracing::warn!("Chat notification failed for '{}': {}", draft.summary, e),
        }

        tracing::info!(
            "Dispatched '{}' [{}]: {}",
            draft.summary,
            risk,
            outcome.action_result.as_str()
        );
        Ok(outcome)
    }

    // 每次外部调用都有超时，超时等同于失败
    async fn bounded<T, F>(&self, call: F) -> std::result::Result<T, ChannelError>
    where
        F: Future<Output = std::result::Result<T, ChannelError>>,
    {
        match tokio::time::timeout(self.channels.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.channels.call_timeout)),
        }
    }

    async fn create_ticket(&self, draft: &FindingDraft) -> std::result::Result<String, ChannelError> {
        let tracker = self
            .channels
            .tickets
            .as_ref()
            .ok_or_else(|| ChannelError::Unavailable("ticket tracker not configured".to_string()))?;

        let request = TicketRequest {
            title: title(draft),
            description: draft.description.clone(),
            issue_type: issue_type(&draft.summary).to_string(),
        };
        self.bounded(tracker.create_ticket(&request)).await
    }

    async fn comment_on_fallback(&self, draft: &FindingDraft) -> std::result::Result<(), ChannelError> {
        let tracker = self
            .channels
            .tickets
            .as_ref()
            .ok_or_else(|| ChannelError::Unavailable("ticket tracker not configured".to_string()))?;

        self.bounded(tracker.comment_on_fallback(&fallback_comment(draft))).await
    }

    /// high → 新建 issue；medium 且带 PR → PR 评论；否则静默跳过
    async fn notify_code_host(&self, draft: &FindingDraft) -> std::result::Result<Option<String>, ChannelError> {
        let host = match &self.channels.code_host {
            Some(host) => host,
            None => {
                return Err(ChannelError::Unavailable("code host not configured".to_string()));
            }
        };
        let body = host_body(draft);

        // PR 编号 0 视为未提供
        match (draft.risk_level, draft.pull_request_ref.filter(|n| *n > 0)) {
            (RiskLevel::High, _) => {
                let issue = IssueRequest {
                    title: title(draft),
                    body,
                    labels: vec![
                        "security".to_string(),
                        "compliance".to_string(),
                        draft.risk_level.as_str().to_string(),
                    ],
                };
                self.bounded(host.create_issue(&issue)).await.map(Some)
            }
            (_, Some(number)) => self
                .bounded(host.comment_on_pull_request(number, &body))
                .await
                .map(Some),
            (_, None) => Ok(None),
        }
    }

    async fn notify_chat(
        &self,
        draft: &FindingDraft,
        result: ActionResult,
    ) -> std::result::Result<Option<String>, ChannelError> {
        let chat = self
            .channels
            .chat
            .as_ref()
            .ok_or_else(|| ChannelError::Unavailable("chat not configured".to_string()))?;

        self.bounded(chat.send(&chat_text(draft, result))).await
    }
}

fn title(draft: &FindingDraft) -> String {
    format!("[{}] {}", draft.risk_level.as_str().to_uppercase(), draft.summary)
}

fn issue_type(summary: &str) -> &'static str {
    if summary.to_lowercase().contains("vulnerability") {
        "Bug"
    } else {
        "Task"
    }
}

fn fallback_comment(draft: &FindingDraft) -> String {
    let description: String = draft.description.chars().take(500).collect();
    format!(
        "--- Agent Action Log ---\nRisk: {}\nIssue Type: {}\nDescription: {}\n\n\
         (Fallback action: ticket creation failed, recording the finding on this issue instead.)",
        draft.risk_level.as_str().to_uppercase(),
        draft.summary,
        description
    )
}

fn host_body(draft: &FindingDraft) -> String {
    format!(
        "**Compliance Finding Detected**\n\n\
         **Risk Level:** {}\n\
         **Summary:** {}\n\
         **Control:** {}\n\n\
         **Description:**\n{}\n\n\
         ---\n\
         *Created automatically by the compliance dispatcher.*",
        draft.risk_level.as_str().to_uppercase(),
        draft.summary,
        draft.control_id.as_deref().unwrap_or("N/A"),
        draft.description
    )
}

fn chat_text(draft: &FindingDraft, result: ActionResult) -> String {
    let risk = draft.risk_level.as_str().to_uppercase();
    format!(
        "*[{}]-Risk Finding Detected!*\n\
         • *Summary:* {}\n\
         • *Risk:* {}\n\
         • *Control:* {}\n\
         • *Action Taken:* {}\n",
        risk,
        draft.summary,
        risk,
        draft.control_id.as_deref().unwrap_or("N/A"),
        result.as_str()
    )
}
