// Slack notifier - 聊天通知
// chat.postMessage，返回消息 ts

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{build_client, ensure_success, ChannelError, ChatNotifier};
use crate::config::SlackConfig;

pub struct SlackNotifier {
    client: Client,
    config: SlackConfig,
}

// Slack 即使失败也返回 200，需要检查 ok 字段
#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig, timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl ChatNotifier for SlackNotifier {
    async fn send(&self, text: &str) -> Result<Option<String>, ChannelError> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.config.api_base))
            .bearer_auth(&self.config.bot_token)
            .json(&json!({ "channel": self.config.channel_id, "text": text }))
            .send()
            .await?;
        let reply: PostMessageResponse = ensure_success(response).await?.json().await?;

        if !reply.ok {
            return Err(ChannelError::InvalidResponse(
                reply.error.unwrap_or_else(|| "slack returned ok=false".to_string()),
            ));
        }

        tracing::info!("Slack message sent to {}", self.config.channel_id);
        Ok(reply.ts)
    }
}
