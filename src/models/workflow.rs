//! 工作流运行状态类型
//!
//! 一次 `WorkflowRun` 对应一份输入文档的完整阶段序列执行。
//! 阶段输出按执行顺序追加记录，写入后不可变；状态只允许单调推进。
//! 运行仅在触发请求存活期间保存在内存注册表中，结束后即丢弃。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// 已创建，尚未开始
    Pending,
    /// 某个阶段执行中
    Running,
    /// 当前阶段完成，后续阶段未开始
    StageComplete,
    /// 全部阶段完成
    Completed,
    /// 执行失败或被取消
    Failed,
}

impl RunStatus {
    /// 是否为终止状态
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// 状态序，用于单调性检查
    fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Running | RunStatus::StageComplete => 1,
            RunStatus::Completed | RunStatus::Failed => 2,
        }
    }
}

/// 一次工作流执行
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    /// 运行 ID
    pub id: String,
    /// 输入文档文本
    pub input_text: String,
    /// 各阶段输出，插入顺序即执行顺序
    pub stage_outputs: IndexMap<String, String>,
    /// 当前阶段索引
    pub current_stage: usize,
    /// 阶段总数
    pub total_stages: usize,
    /// 运行状态
    pub status: RunStatus,
    /// 开始时间
    pub started_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// 创建新的运行
    pub fn new(id: impl Into<String>, total_stages: usize) -> Self {
        Self {
            id: id.into(),
            input_text: String::new(),
            stage_outputs: IndexMap::new(),
            current_stage: 0,
            total_stages,
            status: RunStatus::Pending,
            started_at: Utc::now(),
        }
    }

    /// 记录阶段输出
    ///
    /// 输出写入后不可变，重复记录同一阶段视为内部错误
    pub fn record_output(
        &mut self,
        stage: impl Into<String>,
        output: String,
    ) -> Result<(), AppError> {
        let stage = stage.into();
        if self.stage_outputs.contains_key(&stage) {
            return Err(AppError::Internal(format!("阶段 {stage} 输出已记录")));
        }
        self.stage_outputs.insert(stage, output);
        self.current_stage = self.stage_outputs.len();
        Ok(())
    }

    /// 状态转换，拒绝从终止状态离开和状态回退
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    /// 已完成的阶段数
    pub fn completed_stages(&self) -> usize {
        self.stage_outputs.len()
    }

    /// 当前进度百分比
    pub fn progress(&self) -> u8 {
        if self.total_stages == 0 {
            return 0;
        }
        (100.0 * self.completed_stages() as f64 / self.total_stages as f64).round() as u8
    }
}

/// 文档元信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub file_name: String,
    pub page_count: usize,
    pub file_size: u64,
}

/// 工作流最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// 测试要点
    pub key_points: String,
    /// 测试用例
    pub test_cases: String,
    /// 测试报告
    pub test_report: String,
    /// 元信息
    pub metadata: ResultMetadata,
}

/// 结果元信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub file_name: String,
    pub page_count: usize,
    pub file_size: u64,
    pub generated_at: String,
}

/// 状态查询视图
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub workflow_id: String,
    pub status: RunStatus,
    pub progress: u8,
    pub timestamp: String,
}

/// 活跃运行注册表
///
/// 仅保存在途运行；触发请求结束后由入口层移除，不做历史持久化
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<String, Arc<RwLock<WorkflowRun>>>,
}

impl RunRegistry {
    /// 创建注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新的运行
    pub fn insert(&self, run: WorkflowRun) -> Arc<RwLock<WorkflowRun>> {
        let id = run.id.clone();
        let handle = Arc::new(RwLock::new(run));
        self.runs.insert(id, handle.clone());
        handle
    }

    /// 获取运行句柄
    pub fn get(&self, id: &str) -> Option<Arc<RwLock<WorkflowRun>>> {
        self.runs.get(id).map(|entry| entry.value().clone())
    }

    /// 移除运行
    pub fn remove(&self, id: &str) {
        self.runs.remove(id);
    }

    /// 生成状态视图
    pub fn snapshot(&self, id: &str) -> Option<RunStatusView> {
        self.get(id).map(|handle| {
            let run = handle.read();
            RunStatusView {
                workflow_id: run.id.clone(),
                status: run.status,
                progress: run.progress(),
                timestamp: Utc::now().to_rfc3339(),
            }
        })
    }

    /// 活跃运行数量
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
