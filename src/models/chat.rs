//! 上游对话请求的线格式类型
//!
//! 两种协议变体共用消息与多模态内容部分的结构

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// 消息内容
///
/// 纯文本或多部分内容（文本 + 图片），序列化为无标签联合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// 纯文本
    Text(String),
    /// 多部分内容
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// 获取文本内容（多部分时拼接所有文本部分）
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// 内容部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// 文本
    Text { text: String },
    /// 图片 URL
    ImageUrl { image_url: ImageUrl },
}

/// 图片 URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// 对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 角色: user, assistant, system
    pub role: String,
    /// 消息内容
    pub content: MessageContent,
}

impl ChatMessage {
    /// 创建纯文本消息
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(content.into()),
        }
    }
}

/// 历史消息（调用方传入的格式）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// 角色
    pub role: String,
    /// 文本内容
    pub content: String,
    /// 图片 data URL 列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// 图片附件数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// base64 编码的图片数据
    pub data: String,
    /// MIME 类型
    pub media_type: String,
}

impl ImageData {
    /// 从原始字节创建
    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self {
            data: STANDARD.encode(bytes),
            media_type: media_type.into(),
        }
    }

    /// 转换为内联 data URL
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// Langchain 会话补全请求体（协议 A）
#[derive(Debug, Clone, Serialize)]
pub struct LangchainChatRequest {
    pub stream: bool,
    pub query: String,
    pub model_name: String,
    pub temperature: f32,
    pub score_threshold: f32,
    pub max_tokens: u32,
    pub history: Vec<ChatMessage>,
}

/// OpenAPI 消息列表请求体（协议 B）
#[derive(Debug, Clone, Serialize)]
pub struct OpenApiChatRequest {
    pub stream: bool,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}
