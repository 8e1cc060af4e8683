//! 评分任务上下文
//!
//! 封装"我正在执行哪个会话的哪个评分任务"这一信息

use std::fmt::Display;

/// 评分任务上下文
///
/// 只携带日志展示所需的信息，不携带任何资源
#[derive(Debug, Clone)]
pub struct UnitCtx {
    /// 会话ID
    pub session_id: String,

    /// 任务序号（从1开始，仅用于日志显示）
    pub unit_index: usize,

    /// 模型标签（单模型名，或 "规则模型+评分模型"）
    pub model_label: String,

    /// 第几次尝试（从1开始）
    pub try_index: u32,
}

impl UnitCtx {
    /// 创建新的任务上下文
    pub fn new(session_id: String, unit_index: usize, model_label: String, try_index: u32) -> Self {
        Self {
            session_id,
            unit_index,
            model_label,
            try_index,
        }
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[会话 {} 任务#{} {}#{}]",
            self.session_id, self.unit_index, self.model_label, self.try_index
        )
    }
}
