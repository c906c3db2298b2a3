// Channel configuration - 外部通道凭据
// 在构造时注入派发器；凭据不完整的通道视为未配置，对应步骤被跳过

use std::time::Duration;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct JiraConfig {
    pub base_url: String,
    pub user_email: String,
    pub api_token: String,
    pub project_key: String,
    /// 创建工单失败时追加评论的固定工单
    pub fallback_issue: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackConfig {
    pub bot_token: String,
    pub channel_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GitHubConfig {
    pub token: String,
    /// owner/repo
    pub repo: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub jira: Option<JiraConfig>,
    pub slack: Option<SlackConfig>,
    pub github: Option<GitHubConfig>,
    pub call_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            jira: None,
            slack: None,
            github: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// 从进程环境变量读取（调用方负责先加载 .env）
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jira = match (get("JIRA_BASE_URL"), get("JIRA_USER_EMAIL"), get("JIRA_API_TOKEN")) {
            (Some(base_url), Some(user_email), Some(api_token)) => Some(JiraConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                user_email,
                api_token,
                project_key: get("JIRA_PROJECT_KEY").unwrap_or_else(|| "CA".to_string()),
                fallback_issue: get("JIRA_FALLBACK_ISSUE").unwrap_or_else(|| "CA-1".to_string()),
            }),
            _ => None,
        };

        let slack = match (get("SLACK_BOT_TOKEN"), get("SLACK_CHANNEL_ID")) {
            (Some(bot_token), Some(channel_id)) => Some(SlackConfig {
                bot_token,
                channel_id,
                api_base: get("SLACK_API_BASE")
                    .unwrap_or_else(|| "https://slack.com/api".to_string())
                    .trim_end_matches('/')
                    .to_string(),
            }),
            _ => None,
        };

        let github = match (get("GITHUB_TOKEN"), get("GITHUB_REPO")) {
            (Some(token), Some(repo)) if repo.contains('/') => Some(GitHubConfig {
                token,
                repo,
                api_base: get("GITHUB_API_BASE")
                    .unwrap_or_else(|| "https://api.github.com".to_string())
                    .trim_end_matches('/')
                    .to_string(),
            }),
            _ => None,
        };

        let call_timeout = get("CHANNEL_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT);

        Self {
            jira,
            slack,
            github,
            call_timeout,
        }
    }
}
