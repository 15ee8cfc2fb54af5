//! 块中继器
//!
//! 消费增量到达的行式字节流，重组完整行后归一化为 `chunk` 事件再发出：
//!
//! - 帧格式：`data: ` 前缀携带载荷，`[DONE]` 哨兵表示逻辑流结束
//! - 收到哨兵后发出一个携带完整拼接内容的 `complete` 事件并停止消费，
//!   哨兵之后的尾部字节不会产生错误
//! - 单行解析失败就地跳过；传输层读取错误发出恰好一个 `error` 事件后终止
//! - 无重试：一次读取错误即终止本次调用的中继

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::cancel::CancellationToken;
use crate::error::AppError;
use crate::stream::events::{EventSink, StreamEvent};
use crate::stream::parsers::parse_stream_payload;

/// 载荷行前缀
pub const DATA_PREFIX: &str = "data: ";
/// 逻辑流结束哨兵
pub const DONE_SENTINEL: &str = "[DONE]";

/// 单行处理结果
#[derive(Debug, PartialEq)]
pub(crate) enum LineOutcome {
    /// 产出一个内容片段
    Chunk(String),
    /// 收到结束哨兵
    Done,
    /// 无内容或无法解析，跳过
    Skip,
}

/// 块中继器
///
/// 持有一次上游调用的累积内容；`chunk` 事件携带片段和
/// 到当前为止的完整拼接，顺序与字节到达顺序一致。
#[derive(Debug, Default)]
pub struct ChunkRelay {
    full_content: String,
}

impl ChunkRelay {
    /// 创建中继器
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前累积的完整内容
    pub fn full_content(&self) -> &str {
        &self.full_content
    }

    /// 处理一个完整行
    pub(crate) fn handle_line(&mut self, line: &str) -> LineOutcome {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return LineOutcome::Skip;
        };
        if payload.trim() == DONE_SENTINEL {
            return LineOutcome::Done;
        }
        match parse_stream_payload(payload) {
            Some(fragment) => {
                self.full_content.push_str(&fragment);
                LineOutcome::Chunk(fragment)
            }
            None => LineOutcome::Skip,
        }
    }

    /// 中继一个字节流，归一化事件发往下发端
    ///
    /// 返回本次调用的完整内容；取消令牌触发时立即以 `Cancelled` 结束
    pub async fn relay<S, E>(
        mut self,
        mut stream: S,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<String, AppError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut buffer = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                next = stream.next() => next,
            };

            let Some(result) = next else {
                break;
            };

            match result {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    while let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        let line = line.trim_end_matches(['\n', '\r']);

                        match self.handle_line(line) {
                            LineOutcome::Chunk(fragment) => {
                                sink.emit(StreamEvent::Chunk {
                                    content: fragment,
                                    full_content: self.full_content.clone(),
                                })
                                .await;
                            }
                            LineOutcome::Done => {
                                sink.emit(StreamEvent::Complete {
                                    message: "生成完成".to_string(),
                                    full_content: Some(self.full_content.clone()),
                                })
                                .await;
                                return Ok(self.full_content);
                            }
                            LineOutcome::Skip => {}
                        }
                    }
                }
                Err(e) => {
                    sink.emit(StreamEvent::error(format!("流读取错误: {e}")))
                        .await;
                    return Err(AppError::Transport(e.to_string()));
                }
            }
        }

        // 流自然结束但未收到哨兵，按完成处理
        sink.emit(StreamEvent::Complete {
            message: "生成完成".to_string(),
            full_content: Some(self.full_content.clone()),
        })
        .await;
        Ok(self.full_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::BufferSink;
    use futures::stream;
    use proptest::prelude::*;
    use std::time::Duration;

    fn bytes_stream(
        parts: Vec<Result<&'static str, String>>,
    ) -> impl Stream<Item = Result<Bytes, String>> + Unpin {
        stream::iter(
            parts
                .into_iter()
                .map(|r| r.map(Bytes::from))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_relay_emits_chunks_in_order() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        let stream = bytes_stream(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"测试\"}}]}\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"要点\"}}]}\n"),
            Ok("data: [DONE]\n"),
        ]);

        let full = ChunkRelay::new()
            .relay(stream, &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "测试要点");

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            StreamEvent::Chunk {
                content: "测试".to_string(),
                full_content: "测试".to_string()
            }
        );
        assert_eq!(
            events[1],
            StreamEvent::Chunk {
                content: "要点".to_string(),
                full_content: "测试要点".to_string()
            }
        );
        assert!(matches!(
            &events[2],
            StreamEvent::Complete { full_content: Some(f), .. } if f == "测试要点"
        ));
    }

    #[tokio::test]
    async fn test_relay_reassembles_split_lines() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        // 单行被拆分到两次读取
        let stream = bytes_stream(vec![
            Ok("data: {\"content\":\"he"),
            Ok("llo\"}\ndata: [DONE]\n"),
        ]);

        let full = ChunkRelay::new()
            .relay(stream, &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "hello");
        assert_eq!(sink.chunks().len(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_stops_consumption_ignoring_trailing_bytes() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        let stream = bytes_stream(vec![
            Ok("data: {\"content\":\"a\"}\ndata: [DONE]\ndata: {\"content\":\"after\"}\n"),
            Ok("垃圾字节 }{ 不应报错\n"),
        ]);

        let full = ChunkRelay::new()
            .relay(stream, &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "a");

        let events = sink.events();
        let completes = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Complete { .. }))
            .count();
        assert_eq!(completes, 1);
        // 哨兵之后没有任何 chunk
        let last_chunk_index = events
            .iter()
            .rposition(|e| matches!(e, StreamEvent::Chunk { .. }))
            .unwrap();
        let complete_index = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Complete { .. }))
            .unwrap();
        assert!(last_chunk_index < complete_index);
    }

    #[tokio::test]
    async fn test_unparseable_lines_are_skipped() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        let stream = bytes_stream(vec![
            Ok("data: 不是JSON{\n"),
            Ok(": keep-alive 注释行\n"),
            Ok("data: {\"usage\":{\"total_tokens\":3}}\n"),
            Ok("data: {\"content\":\"ok\"}\n"),
            Ok("data: [DONE]\n"),
        ]);

        let full = ChunkRelay::new()
            .relay(stream, &sink, &cancel)
            .await
            .unwrap();
        // 无法解析的行不推进累积内容
        assert_eq!(full, "ok");
        assert_eq!(sink.chunks().len(), 1);
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, StreamEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_transport_error_emits_single_error_and_stops() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        let stream = bytes_stream(vec![
            Ok("data: {\"content\":\"部分\"}\n"),
            Err("连接被重置".to_string()),
        ]);

        let result = ChunkRelay::new().relay(stream, &sink, &cancel).await;
        assert!(matches!(result, Err(AppError::Transport(_))));

        let events = sink.events();
        let errors = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        // 错误之后不再有 complete
        assert!(!events
            .iter()
            .any(|e| matches!(e, StreamEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn test_natural_end_without_sentinel_completes() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        let stream = bytes_stream(vec![Ok("data: {\"content\":\"整段\"}\n")]);

        let full = ChunkRelay::new()
            .relay(stream, &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(full, "整段");
        assert!(matches!(
            sink.events().last().unwrap(),
            StreamEvent::Complete { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_settles_promptly_without_further_chunks() {
        let sink = BufferSink::new();
        let cancel = CancellationToken::new();
        // 永远挂起的流
        let stream = stream::pending::<Result<Bytes, String>>();

        let relay = ChunkRelay::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            relay.relay(stream, &sink, &cancel),
        )
        .await
        .expect("取消后应立即结束");
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(sink.chunks().is_empty());
    }

    proptest! {
        // full_content 恒等于所有片段按序拼接
        #[test]
        fn prop_full_content_is_concatenation(fragments in proptest::collection::vec("[a-zA-Z0-9\u{4e00}-\u{9fa5} ]{0,8}", 0..20)) {
            let mut relay = ChunkRelay::new();
            let mut expected = String::new();
            for fragment in &fragments {
                let payload = serde_json::json!({ "content": fragment }).to_string();
                let outcome = relay.handle_line(&format!("{DATA_PREFIX}{payload}"));
                if fragment.is_empty() {
                    prop_assert_eq!(outcome, LineOutcome::Skip);
                } else {
                    expected.push_str(fragment);
                    prop_assert_eq!(outcome, LineOutcome::Chunk(fragment.clone()));
                }
                prop_assert_eq!(relay.full_content(), expected.as_str());
            }
        }
    }
}
