//! 工作流模块
//!
//! 测试用例生成工作流：文档解析 → 测试要点 → 测试用例 → 测试报告 → 完成

pub mod sequencer;
pub mod stages;

#[cfg(test)]
mod tests;

pub use sequencer::{WorkflowRequest, WorkflowSequencer};
pub use stages::{default_stages, StageContext, WorkflowStage};
