//! 节流重放
//!
//! 将一段已经生成完毕的文本按固定字符窗口渐进重放，窗口之间加入
//! 短暂延迟，用于对一次性生成的内容模拟流式展示。这只是静态文本
//! 之上的展示手段；当真实的上游增量可用时一律走中继器，不使用重放。

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::AppError;
use crate::stream::events::{EventSink, StreamEvent};

/// 重放选项
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// 每个窗口的字符数
    pub chunk_size: usize,
    /// 窗口之间的延迟
    pub chunk_delay: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            chunk_delay: Duration::from_millis(50),
        }
    }
}

impl ReplayOptions {
    /// 指定延迟毫秒数的选项
    pub fn with_delay_ms(delay_ms: u64) -> Self {
        Self {
            chunk_delay: Duration::from_millis(delay_ms),
            ..Self::default()
        }
    }
}

/// 渐进重放一段文本
///
/// 按字符窗口切分发出 `chunk` 事件，`full_content` 为本次重放内的
/// 累积内容；取消令牌触发时立即停止
pub async fn replay_text(
    text: &str,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
    options: &ReplayOptions,
) -> Result<(), AppError> {
    let chunk_size = options.chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut full_content = String::new();

    for window in chars.chunks(chunk_size) {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let piece: String = window.iter().collect();
        full_content.push_str(&piece);
        sink.emit(StreamEvent::Chunk {
            content: piece,
            full_content: full_content.clone(),
        })
        .await;

        if !options.chunk_delay.is_zero() {
            tokio::time::sleep(options.chunk_delay).await;
        }
    }

    Ok(())
}

/// 带小节标题的重放
pub async fn replay_section(
    title: &str,
    text: &str,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
    options: &ReplayOptions,
) -> Result<(), AppError> {
    sink.emit(StreamEvent::Section {
        title: title.to_string(),
    })
    .await;
    replay_text(text, sink, cancel, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::BufferSink;

    fn instant_options() -> ReplayOptions {
        ReplayOptions {
            chunk_size: 3,
            chunk_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_replay_windows_and_accumulation() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();

        replay_text("abcdefgh", &sink, &cancel, &instant_options())
            .await
            .unwrap();

        let chunks = sink.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0],
            StreamEvent::Chunk {
                content: "abc".to_string(),
                full_content: "abc".to_string()
            }
        );
        assert_eq!(
            chunks[2],
            StreamEvent::Chunk {
                content: "gh".to_string(),
                full_content: "abcdefgh".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_replay_handles_multibyte_chars() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();

        replay_text("测试要点汇总", &sink, &cancel, &instant_options())
            .await
            .unwrap();

        let chunks = sink.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1],
            StreamEvent::Chunk {
                content: "点汇总".to_string(),
                full_content: "测试要点汇总".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_replay_section_emits_title_first() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();

        replay_section("📋 测试要点", "内容", &sink, &cancel, &instant_options())
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(
            events[0],
            StreamEvent::Section {
                title: "📋 测试要点".to_string()
            }
        );
        assert!(matches!(events[1], StreamEvent::Chunk { .. }));
    }

    #[tokio::test]
    async fn test_replay_stops_on_cancel() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = replay_text("abcdef", &sink, &cancel, &instant_options()).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(sink.chunks().is_empty());
    }

    #[tokio::test]
    async fn test_replay_empty_text_emits_nothing() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();

        replay_text("", &sink, &cancel, &instant_options())
            .await
            .unwrap();
        assert!(sink.events().is_empty());
    }
}
