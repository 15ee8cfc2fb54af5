//! 工作流编排器测试

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::error::AppError;
use crate::extract::TextExtractor;
use crate::llm::{GenerationRequest, TextGenerator};
use crate::models::{RunRegistry, RunStatus};
use crate::stream::events::{BufferSink, EventSink, StreamEvent};
use crate::workflow::sequencer::{WorkflowRequest, WorkflowSequencer};
use crate::workflow::stages;

const DOC_TEXT: &str = "Login requires username and password";

/// 脚本化的生成器：按调用顺序返回预设输出，可在第 N 次调用失败
struct MockGenerator {
    responses: Vec<&'static str>,
    prompts: Mutex<Vec<String>>,
    fail_on_call: Option<usize>,
    failure: AppError,
}

impl MockGenerator {
    fn new(responses: Vec<&'static str>) -> Self {
        Self {
            responses,
            prompts: Mutex::new(Vec::new()),
            fail_on_call: None,
            failure: AppError::Internal("unused".to_string()),
        }
    }

    fn failing_at(mut self, call: usize, failure: AppError) -> Self {
        self.fail_on_call = Some(call);
        self.failure = failure;
        self
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next_response(&self, request: &GenerationRequest) -> Result<String, AppError> {
        let call = {
            let mut prompts = self.prompts.lock();
            prompts.push(request.prompt.clone());
            prompts.len()
        };
        if self.fail_on_call == Some(call) {
            return Err(self.failure.clone());
        }
        Ok(self.responses[call - 1].to_string())
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        self.next_response(request)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let text = self.next_response(request)?;
        // 模拟两个增量后完成
        let mid = text.chars().count() / 2;
        let head: String = text.chars().take(mid).collect();
        let tail: String = text.chars().skip(mid).collect();
        sink.emit(StreamEvent::Chunk {
            content: head.clone(),
            full_content: head,
        })
        .await;
        sink.emit(StreamEvent::Chunk {
            content: tail,
            full_content: text.clone(),
        })
        .await;
        sink.emit(StreamEvent::Complete {
            message: "生成完成".to_string(),
            full_content: Some(text.clone()),
        })
        .await;
        Ok(text)
    }
}

fn write_doc() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
    write!(file, "{DOC_TEXT}").unwrap();
    file
}

fn request(run_id: &str, file: &tempfile::NamedTempFile) -> WorkflowRequest {
    WorkflowRequest {
        run_id: run_id.to_string(),
        file_path: file.path().to_path_buf(),
        model: "qwen2.5-32b".to_string(),
    }
}

#[tokio::test]
async fn test_stage_outputs_chain_into_next_stage() {
    let file = write_doc();
    let registry = Arc::new(RunRegistry::new());
    let sequencer = WorkflowSequencer::new(registry.clone());
    let generator = Arc::new(MockGenerator::new(vec!["要点A", "用例B", "报告C"]));
    let sink = BufferSink::new();

    let result = sequencer
        .run(
            request("run-1", &file),
            Arc::new(TextExtractor),
            generator.clone(),
            &sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // 阶段输出逐级成为下一阶段的输入
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[0], stages::key_points_prompt(DOC_TEXT));
    assert_eq!(prompts[1], stages::test_cases_prompt("要点A", DOC_TEXT));
    assert_eq!(prompts[2], stages::test_report_prompt("用例B", "要点A"));

    // 聚合结果包含三段非空文本与元信息
    assert_eq!(result.key_points, "要点A");
    assert_eq!(result.test_cases, "用例B");
    assert_eq!(result.test_report, "报告C");
    assert!(result.metadata.page_count >= 1);
    assert!(result.metadata.file_name.ends_with(".txt"));
    assert!(result.metadata.file_size > 0);

    // 状态为已完成，且已完成阶段数等于总数
    let run = registry.get("run-1").unwrap();
    let run = run.read();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.completed_stages(), run.total_stages);
    assert_eq!(run.input_text, DOC_TEXT);
}

#[tokio::test]
async fn test_event_sequence_on_success() {
    let file = write_doc();
    let registry = Arc::new(RunRegistry::new());
    let sequencer = WorkflowSequencer::new(registry);
    let generator = Arc::new(MockGenerator::new(vec!["要点", "用例", "报告"]));
    let sink = BufferSink::new();

    sequencer
        .run(
            request("run-2", &file),
            Arc::new(TextExtractor),
            generator,
            &sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = sink.events();

    // 进度按 round(100 * 已完成 / 总数) 递增
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![20, 40, 60, 80, 100]);

    // 单次上游调用的 complete 被阶段边界吸收，只有一个工作流级 complete
    let completes = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Complete { .. }))
        .count();
    assert_eq!(completes, 1);
    assert!(events.last().unwrap().is_terminal());

    // 生成阶段的增量原样到达客户端
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Chunk { .. })));
    // 无错误事件
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Error { .. })));
}

#[tokio::test]
async fn test_stage_failure_stops_pipeline() {
    let file = write_doc();
    let registry = Arc::new(RunRegistry::new());
    let sequencer = WorkflowSequencer::new(registry.clone());
    // 第 2 次生成调用（GenerateTestCases 阶段）返回上游 500
    let generator = Arc::new(
        MockGenerator::new(vec!["要点", "用例", "报告"])
            .failing_at(2, AppError::Upstream { status: 500 }),
    );
    let sink = BufferSink::new();

    let result = sequencer
        .run(
            request("run-3", &file),
            Arc::new(TextExtractor),
            generator.clone(),
            &sink,
            CancellationToken::new(),
        )
        .await;

    match result {
        Err(AppError::StageFailure { stage, message }) => {
            assert_eq!(stage, "GenerateTestCases");
            assert!(message.contains("500"));
        }
        other => panic!("expected StageFailure, got {other:?}"),
    }

    // 后续阶段不再执行
    assert_eq!(generator.prompts().len(), 2);

    // 恰好一个错误事件，携带失败阶段名；无 complete
    let events = sink.events();
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("GenerateTestCases"));
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Complete { .. })));

    let run = registry.get("run-3").unwrap();
    assert_eq!(run.read().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_extraction_failure_before_generation() {
    let registry = Arc::new(RunRegistry::new());
    let sequencer = WorkflowSequencer::new(registry);
    let generator = Arc::new(MockGenerator::new(vec!["要点", "用例", "报告"]));
    let sink = BufferSink::new();

    let request = WorkflowRequest {
        run_id: "run-4".to_string(),
        file_path: "/no/such/file.txt".into(),
        model: "qwen2.5-32b".to_string(),
    };
    let result = sequencer
        .run(
            request,
            Arc::new(TextExtractor),
            generator.clone(),
            &sink,
            CancellationToken::new(),
        )
        .await;

    match result {
        Err(AppError::StageFailure { stage, .. }) => assert_eq!(stage, "ParseDocument"),
        other => panic!("expected StageFailure, got {other:?}"),
    }
    // 任何生成调用都未发生
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_settles_without_error_event() {
    let file = write_doc();
    let registry = Arc::new(RunRegistry::new());
    let sequencer = WorkflowSequencer::new(registry.clone());
    let generator = Arc::new(MockGenerator::new(vec!["要点", "用例", "报告"]));
    let sink = BufferSink::new();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = sequencer
        .run(
            request("run-5", &file),
            Arc::new(TextExtractor),
            generator.clone(),
            &sink,
            cancel,
        )
        .await;

    assert!(matches!(result, Err(AppError::Cancelled)));
    assert!(generator.prompts().is_empty());
    assert!(!sink
        .events()
        .iter()
        .any(|e| matches!(e, StreamEvent::Error { .. })));
    assert_eq!(
        registry.get("run-5").unwrap().read().status,
        RunStatus::Failed
    );
}
