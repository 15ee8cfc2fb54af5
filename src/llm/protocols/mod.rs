//! 协议策略模块
//!
//! 使用策略模式处理两种上游协议变体（Langchain 会话补全 / OpenAPI
//! 消息列表）。协议由模型能力表解析一次得出，两个实现构造各自的
//! 请求体并发出 HTTP 调用；响应的消费（JSON 解析或流式中继）统一
//! 由生成客户端完成。

mod langchain;
mod openapi;

pub use langchain::LangchainProtocol;
pub use openapi::OpenApiProtocol;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::LlmConfig;
use crate::error::AppError;
use crate::llm::GenerationRequest;
use crate::models::{
    ApiProtocol, ChatMessage, ContentPart, HistoryMessage, ImageData, ImageUrl, MessageContent,
    ModelCapability,
};

/// 协议处理器 trait
#[async_trait]
pub trait Protocol: Send + Sync {
    /// 构造请求体并发出上游调用，返回未读取的响应
    async fn send(
        &self,
        client: &Client,
        config: &LlmConfig,
        capability: &ModelCapability,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, AppError>;

    /// 获取 API 端点路径
    fn endpoint(&self) -> &'static str;
}

/// 根据协议变体创建协议处理器
pub fn create_protocol(protocol: ApiProtocol) -> Box<dyn Protocol> {
    match protocol {
        ApiProtocol::Langchain => Box::new(LangchainProtocol),
        ApiProtocol::OpenApi => Box::new(OpenApiProtocol),
    }
}

/// 将调用方历史转换为协议消息列表
///
/// 多模态模型保留图片部分，其余模型只保留文本
pub(crate) fn build_history(
    capability: &ModelCapability,
    history: &[HistoryMessage],
) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| {
            if capability.multimodal && !m.images.is_empty() {
                let mut parts = vec![ContentPart::Text {
                    text: m.content.clone(),
                }];
                for url in &m.images {
                    parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl { url: url.clone() },
                    });
                }
                ChatMessage {
                    role: m.role.clone(),
                    content: MessageContent::Parts(parts),
                }
            } else {
                ChatMessage::text(&m.role, &m.content)
            }
        })
        .collect()
}

/// 构造当前用户消息
///
/// 多模态模型将图片附件编码为 `image_url` 内容部分，否则静默忽略
pub(crate) fn build_user_message(
    capability: &ModelCapability,
    prompt: &str,
    images: &[ImageData],
) -> ChatMessage {
    if capability.multimodal && !images.is_empty() {
        let mut parts = vec![ContentPart::Text {
            text: prompt.to_string(),
        }];
        for image in images {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.to_data_url(),
                },
            });
        }
        ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    } else {
        ChatMessage::text("user", prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MODELS;

    fn capability(name: &str) -> &'static ModelCapability {
        MODELS.iter().find(|m| m.name == name).unwrap()
    }

    #[test]
    fn test_build_history_text_only_model_drops_images() {
        let history = vec![HistoryMessage {
            role: "user".to_string(),
            content: "问题".to_string(),
            images: vec!["data:image/png;base64,xxx".to_string()],
        }];
        let messages = build_history(capability("qwen2.5-32b"), &history);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].content,
            MessageContent::Text("问题".to_string())
        );
    }

    #[test]
    fn test_build_history_multimodal_keeps_images() {
        let history = vec![HistoryMessage {
            role: "user".to_string(),
            content: "看图".to_string(),
            images: vec!["data:image/png;base64,xxx".to_string()],
        }];
        let messages = build_history(capability("Qwen2.5-VL-72B"), &history);
        match &messages[0].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
            }
            _ => panic!("expected multimodal parts"),
        }
    }

    #[test]
    fn test_build_history_skips_empty_content() {
        let history = vec![
            HistoryMessage {
                role: "user".to_string(),
                content: String::new(),
                images: vec![],
            },
            HistoryMessage {
                role: "assistant".to_string(),
                content: "回答".to_string(),
                images: vec![],
            },
        ];
        let messages = build_history(capability("qwen2.5-32b"), &history);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "assistant");
    }

    #[test]
    fn test_build_user_message_ignores_media_for_text_model() {
        let images = vec![ImageData::from_bytes(b"img", "image/png")];
        let message = build_user_message(capability("qwen2.5-32b"), "提示", &images);
        assert_eq!(message.content, MessageContent::Text("提示".to_string()));
    }

    #[test]
    fn test_build_user_message_encodes_media_parts() {
        let images = vec![ImageData::from_bytes(b"img", "image/png")];
        let message = build_user_message(capability("Qwen2.5-VL-72B"), "提示", &images);
        match &message.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                match &parts[1] {
                    ContentPart::ImageUrl { image_url } => {
                        assert!(image_url.url.starts_with("data:image/png;base64,"));
                    }
                    _ => panic!("expected image part"),
                }
            }
            _ => panic!("expected multimodal parts"),
        }
    }

    #[test]
    fn test_create_protocol_endpoints() {
        assert_eq!(
            create_protocol(ApiProtocol::Langchain).endpoint(),
            "/open-api/langchain-chat/chat/chat"
        );
        assert_eq!(
            create_protocol(ApiProtocol::OpenApi).endpoint(),
            "/open-api/oneapi/v1/chat/completions"
        );
    }
}
