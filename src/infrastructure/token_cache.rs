//! 访问令牌缓存 - 基础设施层
//!
//! 持有进程内唯一的访问令牌，只暴露 `get_valid_token()` 能力
//!
//! - 令牌未过期（扣除安全余量）时直接读缓存，只需要读锁
//! - 刷新由异步互斥锁串行化，拿到锁后再检查一次，
//!   并发调用方只会触发一次刷新

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ServiceError;

/// 令牌来源（例如飞书 tenant_access_token 接口）
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<IssuedToken, ServiceError>;
}

/// 新签发的令牌
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    /// 有效期
    pub expires_in: Duration,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    /// 需要刷新的时间点（已扣除安全余量）
    refresh_at: Instant,
}

/// 令牌缓存
pub struct TokenCache<S> {
    source: S,
    margin: Duration,
    cached: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl<S: TokenSource> TokenCache<S> {
    pub fn new(source: S, margin: Duration) -> Self {
        Self {
            source,
            margin,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// 获取一个仍然有效的令牌，必要时刷新
    pub async fn get_valid_token(&self) -> Result<String, ServiceError> {
        if let Some(token) = self.cached_value() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;

        // 等锁期间可能已经被其他调用方刷新
        if let Some(token) = self.cached_value() {
            debug!("令牌已由其他任务刷新，直接复用");
            return Ok(token);
        }

        let issued = self.source.fetch().await?;
        let lifetime = issued.expires_in.saturating_sub(self.margin);
        let cached = CachedToken {
            value: issued.value.clone(),
            refresh_at: Instant::now() + lifetime,
        };

        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(cached);
        info!(
            "🔑 访问令牌已刷新，有效期 {}s (提前 {}s 刷新)",
            issued.expires_in.as_secs(),
            self.margin.as_secs()
        );

        Ok(issued.value)
    }

    /// 丢弃缓存，下次调用强制刷新（例如服务端提示令牌失效）
    pub fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn cached_value(&self) -> Option<String> {
        let guard = self.cached.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|token| Instant::now() < token.refresh_at)
            .map(|token| token.value.clone())
    }
}
