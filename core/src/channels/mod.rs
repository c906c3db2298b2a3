// Channels - 外部通道
// 工单系统、聊天通知、代码托管三类能力接口及其 HTTP 实现

pub mod github;
pub mod jira;
pub mod mock;
pub mod slack;

use async_trait::async_trait;
use std::time::Duration;

pub use github::GitHubHost;
pub use jira::JiraTracker;
pub use mock::{CallLog, MockChat, MockCodeHost, MockTracker};
pub use slack::SlackNotifier;

/// 通道级错误：只在派发器内部被记录并吸收，不会传给调用方
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub title: String,
    pub description: String,
    /// Jira issue type, e.g. "Bug" / "Task"
    pub issue_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// 工单系统
#[async_trait]
pub trait TicketTracker: Send + Sync {
    /// 创建工单，返回工单号
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String, ChannelError>;

    /// 在预先约定的回退工单上追加评论
    async fn comment_on_fallback(&self, body: &str) -> Result<(), ChannelError>;
}

/// 聊天通知
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// 发送消息，返回消息标识（如果通道提供）
    async fn send(&self, text: &str) -> Result<Option<String>, ChannelError>;
}

/// 代码托管平台
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// 新建 issue，返回链接
    async fn create_issue(&self, issue: &IssueRequest) -> Result<String, ChannelError>;

    /// 在 PR 上评论，返回链接
    async fn comment_on_pull_request(&self, number: u64, body: &str) -> Result<String, ChannelError>;
}

/// 非 2xx 时读取响应体并转为错误
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ChannelError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("compliance-core/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ChannelError::from)
}
