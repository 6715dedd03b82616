use std::time::Duration;

use thiserror::Error;

/// 应用程序错误类型
///
/// 致命错误（验证、识别、保存）直接终止当前操作；
/// 分析、去手写失败只会降级数据，由调用方记录日志后继续。
#[derive(Debug, Error)]
pub enum AppError {
    /// 图片验证失败
    #[error("图片验证失败: {0}")]
    Validation(#[from] ValidationError),

    /// 题目识别失败
    #[error("题目识别失败: {0}")]
    Recognition(#[source] ServiceError),

    /// 题目分析失败（可恢复）
    #[error("题目分析失败: {0}")]
    Analysis(#[source] ServiceError),

    /// 去手写处理失败（可恢复）
    #[error("去手写处理失败: {0}")]
    Cleanup(#[source] ServiceError),

    /// 保存记录失败
    #[error("保存记录失败: {0}")]
    Persistence(#[source] ServiceError),

    /// 缺少上下文（题目文本 / 错误类型），需要用户补充
    #[error("缺少必要信息: {0}")]
    MissingContext(String),

    /// 文本生成失败，可以重试同一步骤
    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    /// 记录不存在
    #[error("未找到记录: {0}")]
    NotFound(String),

    /// 会话状态不允许当前操作
    #[error("会话状态错误: 当前 {current}，无法执行 {operation}")]
    InvalidState {
        current: String,
        operation: &'static str,
    },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 批量录入时无法读取收件目录
    #[error("无法读取目录 {path}: {source}")]
    Inbox {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// 按记录ID读取失败时的归类：记录不存在 → `NotFound`，其余 → `Persistence`
    pub fn lookup(record_id: &str, err: ServiceError) -> Self {
        if err.is_not_found() {
            AppError::NotFound(record_id.to_string())
        } else {
            AppError::Persistence(err)
        }
    }
}

/// 图片验证错误
#[derive(Debug, Error)]
pub enum ValidationError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },

    /// 文件过大
    #[error("文件大小 {size} 字节超过上限 {limit} 字节: {path}")]
    TooLarge { path: String, size: u64, limit: u64 },

    /// 无法解码为图片
    #[error("无效的图片文件 ({path}): {reason}")]
    Undecodable { path: String, reason: String },
}

/// 外部服务（识别 / 去手写 / 存储）调用错误
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 调用超时
    #[error("{operation} 超时 ({}s)", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// 网络请求失败
    #[error("请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// 服务返回错误响应
    #[error("服务返回错误响应 ({endpoint}): code={code:?}, message={message:?}")]
    BadResponse {
        endpoint: String,
        code: Option<i64>,
        message: Option<String>,
    },

    /// 服务返回空结果
    #[error("服务返回空结果: {endpoint}")]
    EmptyResponse { endpoint: String },

    /// 记录不存在
    #[error("记录不存在: {record_id}")]
    RecordNotFound { record_id: String },

    /// 文件读写失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 图片处理失败
    #[error("图片处理失败 ({path}): {reason}")]
    Image { path: String, reason: String },

    /// 其他错误（包装 adapter 内部的 anyhow 错误）
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ServiceError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::RecordNotFound { .. })
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Other(format!("{:#}", err))
    }
}

/// 文本生成失败
///
/// 生成服务的所有失败（网络、超时、响应格式错误）都收敛到这个类型，
/// 调用方拿到后可以原样重试同一步骤。
#[derive(Debug, Clone, Error)]
#[error("文本生成失败: {reason}")]
pub struct GenerationFailure {
    pub reason: String,
}

impl GenerationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(format!("生成超时 ({}s)", after.as_secs()))
    }

    pub fn malformed(what: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(format!("{} 格式错误: {}", what, detail))
    }
}

impl From<anyhow::Error> for GenerationFailure {
    fn from(err: anyhow::Error) -> Self {
        GenerationFailure::new(format!("{:#}", err))
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填项缺失
    #[error("缺少必填配置项: {field}")]
    Missing { field: &'static str },

    /// 配置值非法
    #[error("配置项 {field} 的值 '{value}' 无效: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
