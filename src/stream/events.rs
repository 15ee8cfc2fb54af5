//! 统一流事件类型
//!
//! 定义流式传输的中间表示，解耦上游载荷解析与下游传输：
//!
//! - 中继器 (relay) 和各工作流阶段输出 `StreamEvent`
//! - HTTP NDJSON 流与 WebSocket 侧信道消费同一种 `StreamEvent`
//!
//! 事件通过 `EventSink` 抽象下发，而不是裸回调，便于后续加入
//! 缓冲或背压策略而不改动产生侧。

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::models::DocumentMeta;

/// 统一流事件
///
/// 同一次上游调用内，`chunk` 事件严格按字节到达顺序发出，
/// `full_content` 恒等于此前所有 `content` 片段的拼接。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 开始处理
    Start { message: String, file_name: String },

    /// 阶段状态
    Status {
        step: String,
        message: String,
        timestamp: String,
    },

    /// 进度
    Progress {
        percent: u8,
        message: String,
        timestamp: String,
    },

    /// 内容增量
    Chunk {
        /// 本次片段
        content: String,
        /// 到目前为止的完整内容
        full_content: String,
    },

    /// 小节标题
    Section { title: String },

    /// 文档元信息
    Metadata { data: DocumentMeta },

    /// 完成
    Complete {
        message: String,
        /// 一次上游调用的完整内容；工作流级完成事件不携带
        #[serde(skip_serializing_if = "Option::is_none")]
        full_content: Option<String>,
    },

    /// 错误
    Error { message: String, timestamp: String },
}

impl StreamEvent {
    /// 创建阶段状态事件
    pub fn status(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            step: step.into(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// 创建进度事件
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            percent,
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// 创建错误事件
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// 是否为流的终止事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// 事件下发端
#[async_trait]
pub trait EventSink: Send + Sync {
    /// 接收一个事件
    async fn emit(&self, event: StreamEvent);
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    async fn emit(&self, event: StreamEvent) {
        (**self).emit(event).await;
    }
}

/// 基于 mpsc 通道的事件下发端
///
/// 通道接收端被丢弃（客户端断开）时触发取消令牌，
/// 使在途上游调用随之中止。
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl ChannelSink {
    /// 创建通道下发端
    pub fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: StreamEvent) {
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
        }
    }
}

/// 测试用：收集事件到内存
#[cfg(test)]
#[derive(Default)]
pub struct BufferSink {
    events: parking_lot::Mutex<Vec<StreamEvent>>,
}

#[cfg(test)]
impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    pub fn chunks(&self) -> Vec<StreamEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, StreamEvent::Chunk { .. }))
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for BufferSink {
    async fn emit(&self, event: StreamEvent) {
        self.events.lock().push(event);
    }
}
