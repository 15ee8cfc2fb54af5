//! 工作流阶段定义
//!
//! 固定阶段序列：解析文档 → 提取测试要点 → 生成测试用例 → 生成测试
//! 报告 → 完成。生成阶段把下发端透传给流式生成调用，真实的上游增量
//! 直接到达客户端；`Finalize` 对已生成的汇总内容做节流重放。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::cancel::CancellationToken;
use crate::error::AppError;
use crate::extract::{DocumentExtractor, ExtractedDocument};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::models::DocumentMeta;
use crate::stream::events::{EventSink, StreamEvent};
use crate::stream::replay::{replay_section, ReplayOptions};

/// 生成阶段统一使用确定性温度
const STAGE_TEMPERATURE: f32 = 0.0;

/// 阶段上下文
///
/// 在阶段间传递累积状态；各阶段只追加，不回改
pub struct StageContext {
    /// 上传文件路径
    pub file_path: PathBuf,
    /// 文档提取协作者
    pub extractor: Arc<dyn DocumentExtractor>,
    /// 生成客户端
    pub generator: Arc<dyn TextGenerator>,
    /// 生成使用的模型
    pub model: String,
    /// 解析后的文档
    pub document: Option<ExtractedDocument>,
    /// 各阶段输出，插入顺序即执行顺序
    pub outputs: IndexMap<String, String>,
    /// 运行级取消令牌
    pub cancel: CancellationToken,
}

impl StageContext {
    fn document(&self) -> Result<&ExtractedDocument, AppError> {
        self.document
            .as_ref()
            .ok_or_else(|| AppError::Internal("文档尚未解析".to_string()))
    }

    fn output(&self, stage: &str) -> Result<&str, AppError> {
        self.outputs
            .get(stage)
            .map(String::as_str)
            .ok_or_else(|| AppError::Internal(format!("缺少阶段 {stage} 的输出")))
    }

    fn generation_request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest::new(&self.model, prompt)
            .with_temperature(STAGE_TEMPERATURE)
            .with_cancel(self.cancel.clone())
    }
}

/// 工作流阶段接口
#[async_trait]
pub trait WorkflowStage: Send + Sync {
    /// 阶段名称
    fn name(&self) -> &'static str;

    /// 阶段开始时的状态文案
    fn status_message(&self) -> &'static str;

    /// 阶段完成时的进度文案
    fn progress_message(&self) -> &'static str;

    /// 执行阶段，返回本阶段输出
    async fn execute(
        &self,
        ctx: &mut StageContext,
        sink: &dyn EventSink,
    ) -> Result<String, AppError>;
}

/// 只转发内容类事件的下发端
///
/// 单次上游调用的 `complete` / `error` 在阶段边界收敛为阶段返回值，
/// 客户端不应在工作流中途收到终止事件
pub(crate) struct ChunkForwardSink<'a> {
    inner: &'a dyn EventSink,
}

impl<'a> ChunkForwardSink<'a> {
    pub(crate) fn new(inner: &'a dyn EventSink) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EventSink for ChunkForwardSink<'_> {
    async fn emit(&self, event: StreamEvent) {
        if matches!(
            event,
            StreamEvent::Chunk { .. } | StreamEvent::Section { .. }
        ) {
            self.inner.emit(event).await;
        }
    }
}

/// 解析文档阶段（调用提取协作者，不是生成调用）
pub struct ParseDocument;

impl ParseDocument {
    pub const NAME: &'static str = "ParseDocument";
}

#[async_trait]
impl WorkflowStage for ParseDocument {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status_message(&self) -> &'static str {
        "正在解析文档..."
    }

    fn progress_message(&self) -> &'static str {
        "文档解析完成"
    }

    async fn execute(
        &self,
        ctx: &mut StageContext,
        _sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let document = ctx.extractor.extract(&ctx.file_path).await?;
        let text = document.text.clone();
        ctx.document = Some(document);
        Ok(text)
    }
}

/// 提取测试要点阶段
pub struct ExtractKeyPoints;

impl ExtractKeyPoints {
    pub const NAME: &'static str = "ExtractKeyPoints";
}

#[async_trait]
impl WorkflowStage for ExtractKeyPoints {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status_message(&self) -> &'static str {
        "正在提取测试要点..."
    }

    fn progress_message(&self) -> &'static str {
        "测试要点提取完成"
    }

    async fn execute(
        &self,
        ctx: &mut StageContext,
        sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let prompt = key_points_prompt(&ctx.document()?.text);

        sink.emit(StreamEvent::Section {
            title: "📋 测试要点".to_string(),
        })
        .await;

        let request = ctx.generation_request(prompt);
        let relay_sink = ChunkForwardSink::new(sink);
        ctx.generator.generate_stream(&request, &relay_sink).await
    }
}

/// 生成测试用例阶段
pub struct GenerateTestCases;

impl GenerateTestCases {
    pub const NAME: &'static str = "GenerateTestCases";
}

#[async_trait]
impl WorkflowStage for GenerateTestCases {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status_message(&self) -> &'static str {
        "正在生成测试用例..."
    }

    fn progress_message(&self) -> &'static str {
        "测试用例生成完成"
    }

    async fn execute(
        &self,
        ctx: &mut StageContext,
        sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let prompt = test_cases_prompt(
            ctx.output(ExtractKeyPoints::NAME)?,
            &ctx.document()?.text,
        );

        sink.emit(StreamEvent::Section {
            title: "🧪 测试用例".to_string(),
        })
        .await;

        let request = ctx.generation_request(prompt);
        let relay_sink = ChunkForwardSink::new(sink);
        ctx.generator.generate_stream(&request, &relay_sink).await
    }
}

/// 生成测试报告阶段
pub struct GenerateTestReport;

impl GenerateTestReport {
    pub const NAME: &'static str = "GenerateTestReport";
}

#[async_trait]
impl WorkflowStage for GenerateTestReport {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status_message(&self) -> &'static str {
        "正在生成测试报告..."
    }

    fn progress_message(&self) -> &'static str {
        "测试报告生成完成"
    }

    async fn execute(
        &self,
        ctx: &mut StageContext,
        sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let prompt = test_report_prompt(
            ctx.output(GenerateTestCases::NAME)?,
            ctx.output(ExtractKeyPoints::NAME)?,
        );

        sink.emit(StreamEvent::Section {
            title: "📊 测试报告".to_string(),
        })
        .await;

        let request = ctx.generation_request(prompt);
        let relay_sink = ChunkForwardSink::new(sink);
        ctx.generator.generate_stream(&request, &relay_sink).await
    }
}

/// 完成阶段
///
/// 输出元信息并对三段已生成内容做节流重放汇总
pub struct Finalize;

impl Finalize {
    pub const NAME: &'static str = "Finalize";
}

#[async_trait]
impl WorkflowStage for Finalize {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status_message(&self) -> &'static str {
        "正在完成工作流..."
    }

    fn progress_message(&self) -> &'static str {
        "工作流执行完成"
    }

    async fn execute(
        &self,
        ctx: &mut StageContext,
        sink: &dyn EventSink,
    ) -> Result<String, AppError> {
        let document = ctx.document()?;
        sink.emit(StreamEvent::Metadata {
            data: DocumentMeta {
                file_name: document.file_name.clone(),
                page_count: document.page_count,
                file_size: document.file_size,
            },
        })
        .await;

        let key_points = ctx.output(ExtractKeyPoints::NAME)?.to_string();
        let test_cases = ctx.output(GenerateTestCases::NAME)?.to_string();
        let test_report = ctx.output(GenerateTestReport::NAME)?.to_string();

        replay_section(
            "📋 测试要点",
            &key_points,
            sink,
            &ctx.cancel,
            &ReplayOptions::with_delay_ms(30),
        )
        .await?;
        replay_section(
            "🧪 测试用例",
            &test_cases,
            sink,
            &ctx.cancel,
            &ReplayOptions::with_delay_ms(40),
        )
        .await?;
        replay_section(
            "📊 测试报告",
            &test_report,
            sink,
            &ctx.cancel,
            &ReplayOptions::with_delay_ms(50),
        )
        .await?;

        Ok("工作流执行完成".to_string())
    }
}

/// 默认阶段序列
pub fn default_stages() -> Vec<Box<dyn WorkflowStage>> {
    vec![
        Box::new(ParseDocument),
        Box::new(ExtractKeyPoints),
        Box::new(GenerateTestCases),
        Box::new(GenerateTestReport),
        Box::new(Finalize),
    ]
}

/// 测试要点提示词
pub(crate) fn key_points_prompt(content: &str) -> String {
    format!(
        "请从以下文档内容中提取关键的测试要点，重点关注：\n\
         1. 功能需求\n\
         2. 边界条件\n\
         3. 异常情况\n\
         4. 性能要求\n\
         5. 安全要求\n\n\
         文档内容：\n{content}\n\n\
         请以结构化的方式输出测试要点："
    )
}

/// 测试用例提示词
pub(crate) fn test_cases_prompt(key_points: &str, content: &str) -> String {
    format!(
        "基于以下测试要点和原始文档，生成详细的测试用例：\n\n\
         测试要点：\n{key_points}\n\n\
         原始文档内容：\n{content}\n\n\
         请生成包含以下内容的测试用例：\n\
         1. 测试用例ID和标题\n\
         2. 前置条件\n\
         3. 测试步骤\n\
         4. 预期结果\n\
         5. 测试数据\n\
         6. 优先级\n\n\
         请以表格或列表的形式输出："
    )
}

/// 测试报告提示词
pub(crate) fn test_report_prompt(test_cases: &str, key_points: &str) -> String {
    format!(
        "基于以下测试用例和测试要点，生成测试报告：\n\n\
         测试要点：\n{key_points}\n\n\
         测试用例：\n{test_cases}\n\n\
         请生成包含以下内容的测试报告：\n\
         1. 测试概述\n\
         2. 测试范围\n\
         3. 测试策略\n\
         4. 风险评估\n\
         5. 测试建议"
    )
}
