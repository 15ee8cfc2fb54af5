//! 流式载荷解析策略
//!
//! 上游存在两种结构不同的流式载荷：
//!
//! - `Delta`: 嵌套增量字段 (`choices[0].delta.content`)，两种协议变体的
//!   流式约定
//! - `Flat`: 顶层文本字段 (`content` / `text`)，简化约定
//!
//! 策略通过一次廉价的结构探测选定，各自产出相同的归一化文本片段；
//! 单行解析失败只跳过该行，绝不中断整个流。

use serde_json::Value;
use tracing::warn;

/// 载荷结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// 嵌套增量字段
    Delta,
    /// 顶层文本字段
    Flat,
}

impl PayloadShape {
    /// 结构探测：根据顶层键选择解析策略
    pub fn detect(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("choices").is_some_and(Value::is_array) {
            return Some(Self::Delta);
        }
        if obj.get("content").is_some_and(Value::is_string)
            || obj.get("text").is_some_and(Value::is_string)
        {
            return Some(Self::Flat);
        }
        None
    }

    /// 按策略提取文本片段
    pub fn extract<'a>(&self, value: &'a Value) -> Option<&'a str> {
        match self {
            Self::Delta => value
                .get("choices")?
                .get(0)?
                .get("delta")?
                .get("content")?
                .as_str(),
            Self::Flat => value
                .get("content")
                .and_then(Value::as_str)
                .or_else(|| value.get("text").and_then(Value::as_str)),
        }
    }
}

/// 解析一行流式载荷，返回非空文本片段
///
/// 无法解析或内容为空时返回 `None`，调用方跳过该行
pub fn parse_stream_payload(data: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!("[StreamParser] 解析载荷失败: {} - data: {}", e, data);
            return None;
        }
    };

    let shape = PayloadShape::detect(&value)?;
    shape
        .extract(&value)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// 从非流式响应体中提取生成内容
///
/// 依次尝试 `choices[0].message.content`、`content`、`text` 三种字段
pub fn extract_message_content(value: &Value) -> Option<String> {
    if let Some(content) = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        return Some(content.to_string());
    }
    value
        .get("content")
        .or_else(|| value.get("text"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// 从 SSE 封装的文本体中取出首个数据载荷
///
/// 部分上游对非流式请求也返回单条 `data: {...}` 帧，需要先解包
pub fn unwrap_sse_frame(body: &str) -> Option<&str> {
    body.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("data: "))
}
