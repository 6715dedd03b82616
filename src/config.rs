//! 程序配置
//!
//! 启动时一次性解析为完整的类型化结构，缺失的必填项在 `validate()` 时立即报错，
//! 不会拖到第一次调用外部服务时才暴露。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 文本生成（引导对话 / 反馈题） ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 图片识别 ---
    pub vision_api_key: String,
    pub vision_api_base_url: String,
    pub vision_model_name: String,
    /// 题目分析使用的模型（纯文本即可）
    pub analysis_model_name: String,
    // --- 飞书多维表格 ---
    pub feishu_app_id: String,
    pub feishu_app_secret: String,
    /// 多维表格 app_token，错题表和反馈题表共用
    pub feishu_app_token: String,
    pub feishu_table_id: String,
    pub feishu_feedback_table_id: Option<String>,
    pub feishu_api_base_url: String,
    // --- 运行参数 ---
    /// 图片大小上限（字节）
    pub max_image_bytes: u64,
    /// 识别 / 去手写 / 存储的单次调用超时（秒）
    pub call_timeout_secs: u64,
    /// 文本生成的单次调用超时（秒）
    pub generation_timeout_secs: u64,
    /// 访问令牌提前刷新的安全余量（秒）
    pub token_refresh_margin_secs: u64,
    /// 去手写结果的输出目录
    pub upload_dir: String,
    /// 批量录入时同时处理的图片数量
    pub max_concurrent_images: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.deepseek.com/v1".to_string(),
            llm_model_name: "deepseek-chat".to_string(),
            vision_api_key: String::new(),
            vision_api_base_url: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            vision_model_name: "doubao-vision-128k".to_string(),
            analysis_model_name: "doubao-pro-4k".to_string(),
            feishu_app_id: String::new(),
            feishu_app_secret: String::new(),
            feishu_app_token: String::new(),
            feishu_table_id: String::new(),
            feishu_feedback_table_id: None,
            feishu_api_base_url: "https://open.feishu.cn/open-apis".to_string(),
            max_image_bytes: 10 * 1024 * 1024,
            call_timeout_secs: 30,
            generation_timeout_secs: 60,
            token_refresh_margin_secs: 300,
            upload_dir: "uploads".to_string(),
            max_concurrent_images: 4,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            vision_api_key: std::env::var("VISION_API_KEY").unwrap_or(default.vision_api_key),
            vision_api_base_url: std::env::var("VISION_API_BASE_URL").unwrap_or(default.vision_api_base_url),
            vision_model_name: std::env::var("VISION_MODEL_NAME").unwrap_or(default.vision_model_name),
            analysis_model_name: std::env::var("ANALYSIS_MODEL_NAME").unwrap_or(default.analysis_model_name),
            feishu_app_id: std::env::var("FEISHU_APP_ID").unwrap_or(default.feishu_app_id),
            feishu_app_secret: std::env::var("FEISHU_APP_SECRET").unwrap_or(default.feishu_app_secret),
            feishu_app_token: std::env::var("FEISHU_APP_TOKEN").unwrap_or(default.feishu_app_token),
            feishu_table_id: std::env::var("FEISHU_TABLE_ID").unwrap_or(default.feishu_table_id),
            feishu_feedback_table_id: std::env::var("FEISHU_FEEDBACK_TABLE_ID").ok().filter(|v| !v.is_empty()),
            feishu_api_base_url: std::env::var("FEISHU_API_BASE_URL").unwrap_or(default.feishu_api_base_url),
            max_image_bytes: std::env::var("MAX_IMAGE_BYTES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_image_bytes),
            call_timeout_secs: std::env::var("CALL_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.call_timeout_secs),
            generation_timeout_secs: std::env::var("GENERATION_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.generation_timeout_secs),
            token_refresh_margin_secs: std::env::var("TOKEN_REFRESH_MARGIN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.token_refresh_margin_secs),
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or(default.upload_dir),
            max_concurrent_images: std::env::var("MAX_CONCURRENT_IMAGES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_images),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
        }
    }

    /// 从 TOML 文件加载配置，未出现的字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 校验必填项和数值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("llm_api_key", &self.llm_api_key),
            ("llm_api_base_url", &self.llm_api_base_url),
            ("llm_model_name", &self.llm_model_name),
            ("vision_api_key", &self.vision_api_key),
            ("vision_model_name", &self.vision_model_name),
            ("feishu_app_id", &self.feishu_app_id),
            ("feishu_app_secret", &self.feishu_app_secret),
            ("feishu_app_token", &self.feishu_app_token),
            ("feishu_table_id", &self.feishu_table_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { field });
            }
        }

        let positive = [
            ("max_image_bytes", self.max_image_bytes),
            ("call_timeout_secs", self.call_timeout_secs),
            ("generation_timeout_secs", self.generation_timeout_secs),
            ("max_concurrent_images", self.max_concurrent_images as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    value: value.to_string(),
                    reason: "必须大于 0".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}
