// GitHub host - 代码托管
// 高风险新建 issue，带 PR 编号的中风险在 PR 下评论

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{build_client, ensure_success, ChannelError, CodeHost, IssueRequest};
use crate::config::GitHubConfig;

pub struct GitHubHost {
    client: Client,
    config: GitHubConfig,
}

#[derive(Debug, Deserialize)]
struct HtmlLink {
    html_url: Option<String>,
}

impl GitHubHost {
    pub fn new(config: GitHubConfig, timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}", self.config.api_base, self.config.repo, tail)
    }

    async fn post_for_link(&self, url: String, payload: serde_json::Value) -> Result<String, ChannelError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .json(&payload)
            .send()
            .await?;
        let link: HtmlLink = ensure_success(response).await?.json().await?;

        link.html_url
            .ok_or_else(|| ChannelError::InvalidResponse("GitHub response has no html_url".to_string()))
    }
}

#[async_trait]
impl CodeHost for GitHubHost {
    async fn create_issue(&self, issue: &IssueRequest) -> Result<String, ChannelError> {
        let url = self
            .post_for_link(
                self.repo_url("issues"),
                json!({ "title": issue.title, "body": issue.body, "labels": issue.labels }),
            )
            .await?;

        tracing::info!("GitHub issue created: {}", url);
        Ok(url)
    }

    async fn comment_on_pull_request(&self, number: u64, body: &str) -> Result<String, ChannelError> {
        // PR 的会话评论走 issues 接口
        let url = self
            .post_for_link(
                self.repo_url(&format!("issues/{}/comments", number)),
                json!({ "body": body }),
            )
            .await?;

        tracing::info!("GitHub PR #{} comment created: {}", number, url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn host(server: &MockServer) -> GitHubHost {
        GitHubHost::new(
            GitHubConfig {
                token: "ghp_test".to_string(),
                repo: "acme/payments".to_string(),
                api_base: server.uri(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_issue_posts_labels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/payments/issues"))
            .and(bearer_token("ghp_test"))
            .and(body_partial_json(json!({ "labels": ["security", "compliance", "high"] })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "html_url": "https://github.com/acme/payments/issues/7" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = host(&server)
            .create_issue(&IssueRequest {
                title: "[HIGH] Hardcoded AWS key".to_string(),
                body: "details".to_string(),
                labels: vec!["security".into(), "compliance".into(), "high".into()],
            })
            .await
            .unwrap();
        assert_eq!(url, "https://github.com/acme/payments/issues/7");
    }

    #[tokio::test]
    async fn pull_request_comment_targets_number() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/payments/issues/42/comments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(
                json!({ "html_url": "https://github.com/acme/payments/pull/42#issuecomment-1" }),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let url = host(&server).comment_on_pull_request(42, "body").await.unwrap();
        assert!(url.ends_with("#issuecomment-1"));
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = host(&server).comment_on_pull_request(1, "body").await.unwrap_err();
        assert!(matches!(err, ChannelError::Status { status: 502, .. }));
    }
}
