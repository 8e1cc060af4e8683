//! # Grade Compare
//!
//! 一个用于多模型评分比对的 Rust 应用程序：把同一份答卷交给
//! 多个 LLM（或"规则提取 → 评分"模型对）打分，与人工参考分数
//! 做差异统计。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Clients）
//! - `clients/` - 唯一持有 HTTP 客户端的模块，只暴露能力
//! - `LlmClient` - 调用 chat-completion 网关，实现 `ModelCaller`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个评分任务
//! - `PromptBuilder` - 提示词构建能力
//! - `ResponseParser` - 容错解析模型响应的能力
//! - `RetryPolicy` - 瞬时错误的退避重试策略
//! - `ResultStore` - 幂等的结果存储
//! - `DiscrepancyEngine` - 三口径差异统计（lt100 / zpf / range）
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个评分任务"的完整处理流程
//! - `UnitCtx` - 上下文封装（session_id + 模型标签 + 尝试序号）
//! - `UnitFlow` - 流程编排（prompt → call → parse → store）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量会话处理器，管理资源
//! - `orchestrator/session_processor` - 单个会话处理器，派发任务

pub mod clients;
pub mod config;
pub mod error;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{LlmClient, ModelCaller};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{GradeRecord, GradingUnit, SessionConfig, SessionStatus};
pub use orchestrator::{process_session, App};
pub use services::{DiscrepancyEngine, ResponseParser, ResultStore, RetryPolicy};
pub use workflow::{UnitCtx, UnitFlow, UnitOutcome};
