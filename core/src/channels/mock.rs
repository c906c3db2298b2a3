// Mock channels - 内存通道
// 每次调用都写入共享的 CallLog，测试据此断言调用了哪些通道以及先后顺序

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ChannelError, ChatNotifier, CodeHost, IssueRequest, TicketRequest, TicketTracker};

/// 跨通道共享的调用记录
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 以给定前缀开头的调用次数
    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

async fn maybe_delay(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// 模拟工单系统，工单号从 CA-100 递增
pub struct MockTracker {
    log: CallLog,
    fail_create: AtomicBool,
    fail_comment: AtomicBool,
    next_key: AtomicU32,
    delay: Duration,
}

impl MockTracker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_create: AtomicBool::new(false),
            fail_comment: AtomicBool::new(false),
            next_key: AtomicU32::new(100),
            delay: Duration::ZERO,
        }
    }

    /// 创建工单返回 500
    pub fn failing(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    /// 回退评论也返回 500
    pub fn failing_comments(self) -> Self {
        self.fail_comment.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TicketTracker for MockTracker {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String, ChannelError> {
        self.log.record(format!("ticket:create:{}", ticket.title));
        maybe_delay(self.delay).await;

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ChannelError::Status {
                status: 500,
                body: "mock tracker failure".to_string(),
            });
        }
        Ok(format!("CA-{}", self.next_key.fetch_add(1, Ordering::SeqCst)))
    }

    async fn comment_on_fallback(&self, _body: &str) -> Result<(), ChannelError> {
        self.log.record("ticket:comment");
        maybe_delay(self.delay).await;

        if self.fail_comment.load(Ordering::SeqCst) {
            return Err(ChannelError::Status {
                status: 500,
                body: "mock comment failure".to_string(),
            });
        }
        Ok(())
    }
}

/// 模拟代码托管
pub struct MockCodeHost {
    log: CallLog,
    fail: AtomicBool,
    delay: Duration,
}

impl MockCodeHost {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn outcome(&self, url: String) -> Result<String, ChannelError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ChannelError::Transport("mock code host failure".to_string()))
        } else {
            Ok(url)
        }
    }
}

#[async_trait]
impl CodeHost for MockCodeHost {
    async fn create_issue(&self, issue: &IssueRequest) -> Result<String, ChannelError> {
        self.log
            .record(format!("host:issue:{}:{}", issue.title, issue.labels.join(",")));
        maybe_delay(self.delay).await;
        self.outcome("https://github.example/acme/repo/issues/1".to_string())
    }

    async fn comment_on_pull_request(&self, number: u64, _body: &str) -> Result<String, ChannelError> {
        self.log.record(format!("host:pr_comment:{}", number));
        maybe_delay(self.delay).await;
        self.outcome(format!("https://github.example/acme/repo/pull/{}#issuecomment-1", number))
    }
}

/// 模拟聊天通知，保留发送的消息文本
pub struct MockChat {
    log: CallLog,
    fail: AtomicBool,
    messages: Mutex<Vec<String>>,
    delay: Duration,
}

impl MockChat {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatNotifier for MockChat {
    async fn send(&self, text: &str) -> Result<Option<String>, ChannelError> {
        self.log.record("chat:send");
        maybe_delay(self.delay).await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("mock chat failure".to_string()));
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(text.to_string());
        }
        Ok(Some(format!("ts-{}", self.log.count("chat:send"))))
    }
}
