//! 业务能力层
//!
//! 提供独立、可单测的业务能力：提示词构建、响应解析、
//! 重试策略、结果存储、差异统计。本层不做流程编排，
//! 也不直接持有 HTTP 客户端。

pub mod discrepancy;
pub mod prompt_builder;
pub mod response_parser;
pub mod result_store;
pub mod retry;

pub use discrepancy::{DiscrepancyEngine, DiscrepancyReport, StatsView};
pub use prompt_builder::PromptBuilder;
pub use response_parser::ResponseParser;
pub use result_store::ResultStore;
pub use retry::RetryPolicy;
