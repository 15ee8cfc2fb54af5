//! 阶段编排器
//!
//! 按固定顺序执行阶段序列，在阶段间传递累积状态：
//!
//! - 每个阶段开始前发出 `status` 事件，完成后发出 `progress` 事件，
//!   `percent = round(100 * 已完成阶段数 / 总阶段数)`
//! - 下发端原样透传给阶段，嵌套组件可直接发出 `chunk` / `section`
//! - 任一阶段失败时发出恰好一个携带阶段名的 `error` 事件并终止，
//!   后续阶段不再执行，不重试、不跳过
//! - 全部成功后发出一个 `complete` 事件并返回聚合结果

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{error, info};

use crate::cancel::CancellationToken;
use crate::error::AppError;
use crate::extract::DocumentExtractor;
use crate::llm::TextGenerator;
use crate::models::{
    ResultMetadata, RunRegistry, RunStatus, WorkflowResult, WorkflowRun,
};
use crate::stream::events::{EventSink, StreamEvent};
use crate::workflow::stages::{
    default_stages, ExtractKeyPoints, GenerateTestCases, GenerateTestReport, ParseDocument,
    StageContext, WorkflowStage,
};

/// 一次工作流请求
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    /// 运行 ID
    pub run_id: String,
    /// 上传文件路径
    pub file_path: PathBuf,
    /// 生成使用的模型
    pub model: String,
}

/// 阶段编排器
pub struct WorkflowSequencer {
    stages: Vec<Box<dyn WorkflowStage>>,
    registry: Arc<RunRegistry>,
}

impl WorkflowSequencer {
    /// 使用默认阶段序列创建编排器
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self {
            stages: default_stages(),
            registry,
        }
    }

    /// 阶段总数
    pub fn total_stages(&self) -> usize {
        self.stages.len()
    }

    /// 阶段名称列表
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 执行完整的工作流
    ///
    /// 运行状态写入注册表供状态查询；条目由触发请求在结束后移除
    pub async fn run(
        &self,
        request: WorkflowRequest,
        extractor: Arc<dyn DocumentExtractor>,
        generator: Arc<dyn TextGenerator>,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, AppError> {
        let total = self.stages.len();
        let run = self
            .registry
            .insert(WorkflowRun::new(request.run_id.clone(), total));
        run.write().transition(RunStatus::Running);

        let mut ctx = StageContext {
            file_path: request.file_path,
            extractor,
            generator,
            model: request.model,
            document: None,
            outputs: IndexMap::new(),
            cancel: cancel.clone(),
        };

        for (index, stage) in self.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                run.write().transition(RunStatus::Failed);
                return Err(AppError::Cancelled);
            }

            run.write().transition(RunStatus::Running);
            sink.emit(StreamEvent::status(stage.name(), stage.status_message()))
                .await;

            let output = match stage.execute(&mut ctx, sink).await {
                Ok(output) => output,
                Err(AppError::Cancelled) => {
                    // 取消不是失败：不发错误事件，直接以 Cancelled 结束
                    run.write().transition(RunStatus::Failed);
                    info!("[Sequencer] 工作流 {} 已取消", request.run_id);
                    return Err(AppError::Cancelled);
                }
                Err(e) => {
                    run.write().transition(RunStatus::Failed);
                    let failure = AppError::StageFailure {
                        stage: stage.name().to_string(),
                        message: e.to_string(),
                    };
                    error!("[Sequencer] {}", failure);
                    sink.emit(StreamEvent::error(failure.to_string())).await;
                    return Err(failure);
                }
            };

            ctx.outputs
                .insert(stage.name().to_string(), output.clone());

            let record = {
                let mut guard = run.write();
                if stage.name() == ParseDocument::NAME {
                    guard.input_text = output.clone();
                }
                let record = guard.record_output(stage.name(), output);
                if record.is_ok() {
                    guard.transition(RunStatus::StageComplete);
                }
                record
            };
            if let Err(e) = record {
                run.write().transition(RunStatus::Failed);
                sink.emit(StreamEvent::error(e.to_string())).await;
                return Err(e);
            }

            let percent = (100.0 * (index + 1) as f64 / total as f64).round() as u8;
            sink.emit(StreamEvent::progress(percent, stage.progress_message()))
                .await;
        }

        run.write().transition(RunStatus::Completed);
        sink.emit(StreamEvent::Complete {
            message: "所有内容生成完成".to_string(),
            full_content: None,
        })
        .await;
        info!("[Sequencer] 工作流 {} 执行完成", request.run_id);

        build_result(&ctx)
    }
}

/// 从阶段上下文聚合最终结果
fn build_result(ctx: &StageContext) -> Result<WorkflowResult, AppError> {
    let document = ctx
        .document
        .as_ref()
        .ok_or_else(|| AppError::Internal("文档尚未解析".to_string()))?;

    let output = |name: &str| ctx.outputs.get(name).cloned().unwrap_or_default();

    Ok(WorkflowResult {
        key_points: output(ExtractKeyPoints::NAME),
        test_cases: output(GenerateTestCases::NAME),
        test_report: output(GenerateTestReport::NAME),
        metadata: ResultMetadata {
            file_name: document.file_name.clone(),
            page_count: document.page_count,
            file_size: document.file_size,
            generated_at: Utc::now().to_rfc3339(),
        },
    })
}
