// Jira tracker - 工单系统
// Jira Cloud REST v3：创建工单，失败时在固定回退工单下追加评论

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{build_client, ensure_success, ChannelError, TicketRequest, TicketTracker};
use crate::config::JiraConfig;

// Jira 对描述字段的长度限制
const MAX_DESCRIPTION_CHARS: usize = 32_000;

pub struct JiraTracker {
    client: Client,
    config: JiraConfig,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: Option<String>,
}

impl JiraTracker {
    pub fn new(config: JiraConfig, timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn issue_url(&self) -> String {
        format!("{}/rest/api/3/issue", self.config.base_url)
    }

    fn comment_url(&self) -> String {
        format!(
            "{}/rest/api/3/issue/{}/comment",
            self.config.base_url, self.config.fallback_issue
        )
    }
}

/// Atlassian Document Format 单段落文档
fn adf_paragraph(text: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [
            { "type": "paragraph", "content": [{ "type": "text", "text": text }] }
        ]
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl TicketTracker for JiraTracker {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String, ChannelError> {
        let payload = json!({
            "fields": {
                "project": { "key": self.config.project_key },
                "issuetype": { "name": ticket.issue_type },
                "summary": ticket.title,
                "description": adf_paragraph(&truncate_chars(&ticket.description, MAX_DESCRIPTION_CHARS)),
            }
        });

        let response = self
            .client
            .post(self.issue_url())
            .basic_auth(&self.config.user_email, Some(&self.config.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;
        let created: CreatedIssue = ensure_success(response).await?.json().await?;

        let key = created
            .key
            .ok_or_else(|| ChannelError::InvalidResponse("Jira response has no issue key".to_string()))?;
        tracing::info!("Jira {} created: {}", ticket.issue_type, key);
        Ok(key)
    }

    async fn comment_on_fallback(&self, body: &str) -> Result<(), ChannelError> {
        let payload = json!({ "body": adf_paragraph(body) });

        let response = self
            .client
            .post(self.comment_url())
            .basic_auth(&self.config.user_email, Some(&self.config.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::info!("Jira fallback comment added to {}", self.config.fallback_issue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tracker(server: &MockServer) -> JiraTracker {
        JiraTracker::new(
            JiraConfig {
                base_url: server.uri(),
                user_email: "bot@acme.io".to_string(),
                api_token: "secret".to_string(),
                project_key: "SEC".to_string(),
                fallback_issue: "SEC-1".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> TicketRequest {
        TicketRequest {
            title: "[HIGH] Hardcoded AWS key".to_string(),
            description: "AKIA... committed in config.py".to_string(),
            issue_type: "Task".to_string(),
        }
    }

    #[tokio::test]
    async fn create_ticket_returns_issue_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/issue"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "fields": {
                    "project": { "key": "SEC" },
                    "issuetype": { "name": "Task" },
                    "summary": "[HIGH] Hardcoded AWS key"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "10001", "key": "SEC-42" })))
            .expect(1)
            .mount(&server)
            .await;

        let key = tracker(&server).create_ticket(&request()).await.unwrap();
        assert_eq!(key, "SEC-42");
    }

    #[tokio::test]
    async fn create_ticket_surfaces_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/issue"))
            .respond_with(ResponseTemplate::new(400).set_body_string("project is required"))
            .mount(&server)
            .await;

        let err = tracker(&server).create_ticket(&request()).await.unwrap_err();
        match err {
            ChannelError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "project is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/issue"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "10001" })))
            .mount(&server)
            .await;

        let err = tracker(&server).create_ticket(&request()).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn fallback_comment_targets_configured_issue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/issue/SEC-1/comment"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "1" })))
            .expect(1)
            .mount(&server)
            .await;

        tracker(&server).comment_on_fallback("agent active").await.unwrap();
    }
}
