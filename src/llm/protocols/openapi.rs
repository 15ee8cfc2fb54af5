//! OpenAPI 协议实现
//!
//! 消息列表式接口（协议 B）：`{stream, model, messages, temperature}`。
//! 未提供历史时，合成一条携带提示词（及多模态图片部分）的用户消息
//! 作为唯一消息。

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{build_history, build_user_message, Protocol};
use crate::config::LlmConfig;
use crate::error::AppError;
use crate::llm::GenerationRequest;
use crate::models::{ModelCapability, OpenApiChatRequest};

/// OpenAPI 协议处理器
pub struct OpenApiProtocol;

#[async_trait]
impl Protocol for OpenApiProtocol {
    async fn send(
        &self,
        client: &Client,
        config: &LlmConfig,
        capability: &ModelCapability,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, AppError> {
        let mut messages = build_history(capability, &request.history);
        if messages.is_empty() {
            messages.push(build_user_message(
                capability,
                &request.prompt,
                &request.images,
            ));
        }

        let body = OpenApiChatRequest {
            stream,
            model: capability.name.to_string(),
            messages,
            temperature: request.temperature,
        };

        let url = format!("{}{}", config.base_url, self.endpoint());
        debug!(
            "[OpenApiProtocol] 发送请求: model={}, stream={}, messages_len={}",
            capability.name,
            stream,
            body.messages.len()
        );

        let mut builder = client
            .post(&url)
            .header("Content-Type", "application/json");
        if !config.api_key.is_empty() {
            builder = builder.header("Authorization", &config.api_key);
        }

        builder
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("请求失败: {e}")))
    }

    fn endpoint(&self) -> &'static str {
        "/open-api/oneapi/v1/chat/completions"
    }
}
