//! 外部协作方的能力边界
//!
//! 流程层只依赖这里的 trait，具体实现（豆包 / DeepSeek / 飞书 / 本地图片处理）
//! 在 `services` 与 `clients` 中提供，测试中可以替换成假实现。

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{GenerationFailure, ServiceError};
use crate::models::{ErrorRecord, FeedbackQuestion, QuestionAnalysis};
use crate::utils::logging::truncate_text;

/// 图片识别能力
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// 识别图片中的题目文本
    async fn recognize(&self, image: &Path) -> Result<String, ServiceError>;

    /// 分析题目：学科、知识点、年级、题型、难度
    async fn analyze(&self, image: &Path, text: &str) -> Result<QuestionAnalysis, ServiceError>;
}

/// 去手写能力（尽力而为）
#[async_trait]
pub trait CleanupService: Send + Sync {
    /// 返回处理后的图片路径；只在输入无法读取时失败
    async fn clean(&self, image: &Path) -> Result<PathBuf, ServiceError>;
}

/// 文本生成能力
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationFailure>;

    /// 请求结构化输出，返回解析后的 JSON
    async fn complete_json(
        &self,
        request: &CompletionRequest,
    ) -> Result<JsonValue, GenerationFailure> {
        let content = self.complete(request).await?;
        extract_json(&content)
            .ok_or_else(|| GenerationFailure::malformed("JSON 响应", truncate_text(&content, 80)))
    }
}

/// 错题记录存储
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn create(&self, record: &ErrorRecord) -> Result<String, ServiceError>;

    async fn get(&self, record_id: &str) -> Result<ErrorRecord, ServiceError>;

    async fn update(&self, record_id: &str, record: &ErrorRecord) -> Result<(), ServiceError>;

    async fn append_feedback(&self, question: &FeedbackQuestion) -> Result<String, ServiceError>;

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ErrorRecord>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// 一次文本生成请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.push(ChatRole::System, content)
    }

    pub fn user(self, content: impl Into<String>) -> Self {
        self.push(ChatRole::User, content)
    }

    pub fn assistant(self, content: impl Into<String>) -> Self {
        self.push(ChatRole::Assistant, content)
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn push(mut self, role: ChatRole, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
        self
    }

    /// 最后一条用户消息，日志和测试里用
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// 从模型输出中提取 JSON 对象
///
/// 兼容 ```json 代码块和前后夹杂说明文字的情况。
pub fn extract_json(content: &str) -> Option<JsonValue> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<JsonValue>(&trimmed[start..=end])
        .ok()
        .filter(JsonValue::is_object)
}

/// 给外部调用加上超时，超时映射为 `ServiceError::Timeout`
pub async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout { operation, after }),
    }
}

/// 文本生成的超时包装，超时映射为 `GenerationFailure`
pub async fn generation_with_timeout<T, F>(after: Duration, fut: F) -> Result<T, GenerationFailure>
where
    F: Future<Output = Result<T, GenerationFailure>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(GenerationFailure::timed_out(after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json(r#"{"type":"summary","content":"好"}"#).unwrap();
        assert_eq!(value["type"], "summary");
    }

    #[test]
    fn test_extract_json_fenced_with_prose() {
        let content = "好的，结果如下：\n```json\n{\"checklist\": [\"移项\", \"求解\"], \"formula\": \"\"}\n```\n";
        let value = extract_json(content).unwrap();
        assert_eq!(value["checklist"][1], "求解");
    }

    #[test]
    fn test_extract_json_rejects_non_object() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("这个式子中x是多少？").is_none());
    }

    #[test]
    fn test_request_builder_keeps_order() {
        let request = CompletionRequest::new()
            .system("老师")
            .user("问题")
            .assistant("请回答")
            .user("x=4")
            .temperature(0.5);
        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[2].role, ChatRole::Assistant);
        assert_eq!(request.last_user_message(), Some("x=4"));
        assert_eq!(request.temperature, 0.5);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<(), ServiceError> = with_timeout(
            "题目识别",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(ServiceError::Timeout { operation: "题目识别", .. })
        ));
    }

    struct Canned(String);

    #[async_trait]
    impl GenerationService for Canned {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationFailure> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_complete_json_reports_truncated_reply() {
        let reply = "抱歉".repeat(60);
        let err = Canned(reply).complete_json(&CompletionRequest::new()).await.unwrap_err();
        assert!(err.reason.starts_with("JSON 响应 格式错误"));
        assert!(err.reason.ends_with("..."));

        let ok = Canned(r#"{"formula": "移项变号"}"#.to_string())
            .complete_json(&CompletionRequest::new())
            .await
            .unwrap();
        assert_eq!(ok["formula"], "移项变号");
    }
}
