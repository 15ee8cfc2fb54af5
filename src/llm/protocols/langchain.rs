//! Langchain 协议实现
//!
//! 会话补全式接口（协议 A）：`{stream, query, model_name, temperature,
//! score_threshold, max_tokens, history}`，无鉴权头

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{build_history, Protocol};
use crate::config::LlmConfig;
use crate::error::AppError;
use crate::llm::GenerationRequest;
use crate::models::{LangchainChatRequest, ModelCapability};

/// Langchain 协议处理器
pub struct LangchainProtocol;

#[async_trait]
impl Protocol for LangchainProtocol {
    async fn send(
        &self,
        client: &Client,
        config: &LlmConfig,
        capability: &ModelCapability,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, AppError> {
        let body = LangchainChatRequest {
            stream,
            query: request.prompt.clone(),
            model_name: capability.name.to_string(),
            temperature: request.temperature,
            score_threshold: config.score_threshold,
            max_tokens: config.max_tokens,
            history: build_history(capability, &request.history),
        };

        let url = format!("{}{}", config.base_url, self.endpoint());
        debug!(
            "[LangchainProtocol] 发送请求: model={}, stream={}, history_len={}",
            capability.name,
            stream,
            body.history.len()
        );

        client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("请求失败: {e}")))
    }

    fn endpoint(&self) -> &'static str {
        "/open-api/langchain-chat/chat/chat"
    }
}
