//! LLM 服务 - 业务能力层
//!
//! 只负责"调用大模型"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（DeepSeek、豆包等）
//! - 同一个类型既用作文本生成（`GenerationService`），
//!   也作为视觉识别（`VisionRecognizer`）的底层客户端

use std::path::Path;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, warn};

use crate::error::{GenerationFailure, ServiceError};
use crate::models::QuestionAnalysis;
use crate::services::contracts::{
    extract_json, ChatMessage, ChatRole, CompletionRequest, GenerationService, RecognitionService,
};
use crate::utils::logging::truncate_text;

/// LLM 服务
///
/// 职责：
/// - 调用 OpenAI 兼容的 chat/completions 接口
/// - 支持多轮消息和图片（Vision）
/// - 不认识错题记录 / 会话
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(api_key: &str, api_base_url: &str, model_name: impl Into<String>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: model_name.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 单轮调用：可选系统消息 + 用户消息（可带图片）
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        imgs: Option<&[String]>,
    ) -> Result<String> {
        let mut request = CompletionRequest::new().temperature(0.1);
        if let Some(sys_msg) = system_message {
            request = request.system(sys_msg);
        }
        request = request.user(user_message);

        self.send_messages(&request, imgs).await
    }

    /// 多轮调用，图片附加在最后一条用户消息上
    pub async fn send_messages(
        &self,
        request: &CompletionRequest,
        imgs: Option<&[String]>,
    ) -> Result<String> {
        debug!(
            "调用 LLM API，模型: {}，消息数: {}",
            self.model_name,
            request.messages.len()
        );

        let last_user = request
            .messages
            .iter()
            .rposition(|m| m.role == ChatRole::User);

        let mut messages = Vec::with_capacity(request.messages.len());
        for (idx, message) in request.messages.iter().enumerate() {
            let attach = if Some(idx) == last_user { imgs } else { None };
            messages.push(build_message(message, attach)?);
        }

        let openai_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()?;

        let response = self.client.chat().create(openai_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败 (模型: {}): {}", self.model_name, e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空 (模型: {})", self.model_name))?;

        Ok(content.trim().to_string())
    }
}

fn build_message(
    message: &ChatMessage,
    imgs: Option<&[String]>,
) -> Result<ChatCompletionRequestMessage> {
    let built = match message.role {
        ChatRole::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.as_str())
                .build()?,
        ),
        ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.as_str())
                .build()?,
        ),
        ChatRole::User => match imgs {
            Some(img_urls) if !img_urls.is_empty() => {
                // Vision：文本 + 图片多段内容
                let mut parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartText {
                        text: message.content.clone(),
                    },
                )];
                for url in img_urls {
                    parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: url.clone(),
                                detail: Some(ImageDetail::High),
                            },
                        },
                    ));
                }
                debug!("使用 Vision API，包含 {} 张图片", img_urls.len());

                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(ChatCompletionRequestUserMessageContent::Array(parts))
                        .build()?,
                )
            }
            _ => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.as_str())
                    .build()?,
            ),
        },
    };
    Ok(built)
}

#[async_trait]
impl GenerationService for LlmService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationFailure> {
        let content = self.send_messages(request, None).await?;
        if content.is_empty() {
            return Err(GenerationFailure::new(format!(
                "LLM 返回内容为空 (模型: {})",
                self.model_name
            )));
        }
        Ok(content)
    }
}

const RECOGNIZE_PROMPT: &str =
    "请识别这张图片中的题目内容，提取出完整的题目文本。如果是数学题，请保留所有数学符号和公式。只返回题目文本。";

/// 视觉识别：视觉模型负责识别文字，文本模型负责分析
pub struct VisionRecognizer {
    vision: LlmService,
    analysis: LlmService,
}

impl VisionRecognizer {
    pub fn new(vision: LlmService, analysis: LlmService) -> Self {
        Self { vision, analysis }
    }

    fn build_analysis_prompt(text: &str) -> String {
        format!(
            r#"请分析以下题目，提取以下信息：
1. 科目（数学/语文/英语/物理/化学/生物/历史/地理/政治）
2. 年级（一年级/二年级/.../高三）
3. 主要知识点（列出2-5个）
4. 题目类型（选择题/填空题/解答题等）
5. 难度等级（简单/中等/困难）

题目内容：
{}

请以JSON格式返回，不要返回任何其他内容，格式如下：
{{
    "subject": "科目",
    "grade": "年级",
    "knowledge_points": ["知识点1", "知识点2"],
    "question_type": "题目类型",
    "difficulty": "难度等级"
}}"#,
            text
        )
    }
}

#[async_trait]
impl RecognitionService for VisionRecognizer {
    async fn recognize(&self, image: &Path) -> Result<String, ServiceError> {
        let data_url = encode_data_url(image).await?;
        let text = self
            .vision
            .send_to_llm(RECOGNIZE_PROMPT, None, Some(&[data_url]))
            .await?;

        if text.trim().is_empty() {
            return Err(ServiceError::EmptyResponse {
                endpoint: format!("recognize ({})", self.vision.model_name()),
            });
        }
        Ok(text)
    }

    async fn analyze(&self, _image: &Path, text: &str) -> Result<QuestionAnalysis, ServiceError> {
        let prompt = Self::build_analysis_prompt(text);
        let response = self.analysis.send_to_llm(&prompt, None, None).await?;

        let value = extract_json(&response).ok_or_else(|| ServiceError::BadResponse {
            endpoint: format!("analyze ({})", self.analysis.model_name()),
            code: None,
            message: Some(truncate_text(&response, 80)),
        })?;

        serde_json::from_value(value).map_err(|e| ServiceError::BadResponse {
            endpoint: format!("analyze ({})", self.analysis.model_name()),
            code: None,
            message: Some(e.to_string()),
        })
    }
}

/// 读取图片并编码为 data URL
async fn encode_data_url(image: &Path) -> Result<String, ServiceError> {
    let bytes = tokio::fs::read(image).await.map_err(|source| ServiceError::Io {
        path: image.display().to_string(),
        source,
    })?;
    Ok(format!(
        "data:{};base64,{}",
        mime_for(image),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

fn mime_for(image: &Path) -> &'static str {
    match image
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
