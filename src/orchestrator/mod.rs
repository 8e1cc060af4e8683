//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量会话处理器
//! - 管理应用生命周期（初始化、运行）
//! - 批量加载会话（Vec<SessionConfig>）
//! - 持有 ModelCaller 和 ResultStore
//! - 输出全局统计信息
//!
//! ### `session_processor` - 单个会话处理器
//! - 展开评分请求为评分任务（Vec<GradingUnit>）
//! - 并发派发任务（Semaphore 控制在途请求数）
//! - 推进会话状态机（Created → Grading → Graded | Failed）
//! - 计算差异统计并写入 JSON 报告
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<SessionConfig>)
//!     ↓
//! session_processor (处理 Vec<GradingUnit>)
//!     ↓
//! workflow::UnitFlow (处理单个 GradingUnit)
//!     ↓
//! services (能力层：prompt / parse / retry / store / discrepancy)
//!     ↓
//! clients (基础设施：LlmClient)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管批量，session_processor 管单个
//! 2. **资源隔离**：只有编排层持有 ModelCaller 和 ResultStore
//! 3. **向下依赖**：编排层 → workflow → services → clients
//! 4. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod batch_processor;
pub mod session_processor;

// 重新导出主要类型
pub use batch_processor::App;
pub use session_processor::{process_session, SessionOutcome};
