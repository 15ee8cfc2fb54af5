//! 生成客户端
//!
//! 对上游生成服务的统一入口。根据模型能力表解析协议变体后分发到
//! 对应的协议处理器；流式调用把字节流交给块中继器消费，非流式调用
//! 兼容两种响应编码（JSON 体，或 SSE 封装的单条 JSON 载荷）。
//!
//! 所有上游调用都与请求的取消令牌竞争：令牌触发时在途调用立即以
//! `Cancelled` 结束，不会悬挂。

pub mod protocols;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::config::LlmConfig;
use crate::error::AppError;
use crate::models::{HistoryMessage, ImageData, ModelRegistry};
use crate::stream::events::EventSink;
use crate::stream::parsers::{extract_message_content, unwrap_sse_frame};
use crate::stream::relay::ChunkRelay;

/// 一次上游生成调用的参数
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// 模型名称
    pub model: String,
    /// 提示词
    pub prompt: String,
    /// 温度
    pub temperature: f32,
    /// 历史消息
    pub history: Vec<HistoryMessage>,
    /// 图片附件
    pub images: Vec<ImageData>,
    /// 取消令牌
    pub cancel: CancellationToken,
}

impl GenerationRequest {
    /// 创建请求
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// 设置温度
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// 设置历史消息
    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    /// 设置图片附件
    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }

    /// 绑定取消令牌
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// 文本生成接口
///
/// 工作流阶段通过此 trait 调用生成服务，便于在测试中替换实现
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 非流式生成，返回完整文本
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError>;

    /// 流式生成，归一化事件发往下发端，返回完整文本
    ///
    /// 下发端只会收到 `chunk` / `complete` / `error` 三类事件
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: &dyn EventSink,
    ) -> Result<String, AppError>;
}

/// 生成客户端
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    registry: Arc<ModelRegistry>,
}

impl LlmClient {
    /// 创建客户端
    pub fn new(config: LlmConfig, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            registry,
        }
    }

    /// 解析协议并发出上游调用，校验状态码
    async fn dispatch(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, AppError> {
        let capability = self.registry.resolve(&request.model);
        let protocol = protocols::create_protocol(capability.protocol);

        let response = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(AppError::Cancelled),
            result = protocol.send(&self.http, &self.config, capability, request, stream) => result?,
        };

        let status = response.status().as_u16();
        if status != 200 {
            warn!("[LlmClient] 上游返回非 200 状态码: {}", status);
            return Err(AppError::Upstream { status });
        }
        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        let response = self.dispatch(request, false).await?;

        let body = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(AppError::Cancelled),
            result = response.text() => {
                result.map_err(|e| AppError::Transport(format!("读取响应失败: {e}")))?
            }
        };

        parse_generation_body(&body)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let response = self.dispatch(request, true).await?;
        ChunkRelay::new()
            .relay(response.bytes_stream(), sink, &request.cancel)
            .await
    }
}

/// 解析非流式响应体
///
/// 接受两种编码：JSON 体，或 SSE 封装的单条 `data: {...}` 载荷；
/// 内容字段依次尝试 `choices[0].message.content`、`content`、`text`
fn parse_generation_body(body: &str) -> Result<String, AppError> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(extract_message_content(&value).unwrap_or_default());
    }

    if let Some(payload) = unwrap_sse_frame(body) {
        if let Ok(value) = serde_json::from_str::<Value>(payload) {
            return Ok(extract_message_content(&value).unwrap_or_default());
        }
    }

    Err(AppError::Parse(format!(
        "无法解析上游响应: {}",
        safe_truncate(body, 200)
    )))
}

/// 安全截断字符串到指定字符数，避免 UTF-8 边界问题
fn safe_truncate(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_chars {
        s.to_string()
    } else {
        chars[..max_chars].iter().collect()
    }
}
